//! Application configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is loaded first if present.
//! Command-line flags override these values in the binary.

use std::env;
use std::path::PathBuf;

use crate::models::Token;
use crate::services::rate_limiter::RateLimitConfig;

pub const DEFAULT_DB_PATH: &str = "data/segments.db";
pub const DEFAULT_TOKEN_PATH: &str = "config/tokens.json";
pub const DEFAULT_STATE_PATH: &str = "backfill_state.json";

/// Strava OAuth application credentials, needed only for token refresh.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Strava credentials ---
    pub credentials: Option<ClientCredentials>,
    /// Access token from the environment, used when no token file exists.
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,

    // --- Paths ---
    pub db_path: PathBuf,
    pub token_path: PathBuf,
    pub state_path: PathBuf,

    // --- Rate limits ---
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: None,
            access_token: None,
            refresh_token: None,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = RateLimitConfig::default();

        let credentials = match (var("STRAVA_CLIENT_ID"), var("STRAVA_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("STRAVA_CLIENT_SECRET")),
            (None, Some(_)) => return Err(ConfigError::Missing("STRAVA_CLIENT_ID")),
        };

        let rate_limit = RateLimitConfig {
            short_quota: parse_var(&var, "STRAVA_SHORT_QUOTA", defaults.short_quota)?,
            long_quota: parse_var(&var, "STRAVA_DAILY_QUOTA", defaults.long_quota)?,
            buffer_fraction: parse_var(&var, "RATE_LIMIT_BUFFER", defaults.buffer_fraction)?,
            ..defaults
        };
        if !(rate_limit.buffer_fraction > 0.0 && rate_limit.buffer_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_BUFFER",
                value: rate_limit.buffer_fraction.to_string(),
            });
        }

        Ok(Self {
            credentials,
            access_token: var("STRAVA_ACCESS_TOKEN"),
            refresh_token: var("STRAVA_REFRESH_TOKEN"),
            db_path: var("BACKFILL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            token_path: var("BACKFILL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            state_path: var("BACKFILL_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            rate_limit,
        })
    }

    /// Token built from environment variables, if any were set.
    ///
    /// Without a refresh token this is a static token (no refresh). Without
    /// an access token the first call refreshes immediately.
    pub fn env_token(&self) -> Option<Token> {
        if self.access_token.is_none() && self.refresh_token.is_none() {
            return None;
        }
        Some(Token {
            access_token: self.access_token.clone().unwrap_or_default(),
            refresh_token: self.refresh_token.clone(),
            expires_at: None,
        })
    }
}

fn parse_var<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
