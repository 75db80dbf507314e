// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token management with lazy refresh.
//!
//! The manager owns the single live token for the account:
//! 1. If the token has no refresh token, it is used as-is (static mode)
//! 2. If it expires within [`REFRESH_SKEW`], exchange the refresh token
//! 3. Persist the refreshed token (including a rotated refresh token)
//!
//! Only one backfill process may run per token file. Two processes
//! refreshing concurrently would invalidate each other's refresh token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ApiError, AuthError, StoreError};
use crate::fs_utils::write_atomic;
use crate::models::Token;
use crate::services::strava::{StravaClient, TokenRefreshResponse};

/// Margin before expiry at which we proactively refresh.
pub const REFRESH_SKEW: Duration = Duration::seconds(60);

/// Where the token comes from and where refreshed tokens go.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The stored token, or `None` if the account was never authorized.
    async fn initial_token(&self) -> Result<Option<Token>, StoreError>;

    /// Durably replace the stored token.
    async fn persist(&self, token: &Token) -> Result<(), StoreError>;
}

/// The refresh-token exchange against the auth endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenRefreshResponse, ApiError>;
}

#[async_trait]
impl TokenRefresher for StravaClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenRefreshResponse, ApiError> {
        self.refresh_token(refresh_token).await
    }
}

/// Supplies valid bearer tokens to the backfill engine.
pub struct TokenManager {
    provider: Arc<dyn TokenProvider>,
    refresher: Arc<dyn TokenRefresher>,
    token: Token,
}

impl TokenManager {
    /// Load the initial token from `provider`.
    pub async fn load(
        provider: Arc<dyn TokenProvider>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Self, AuthError> {
        let token = provider
            .initial_token()
            .await
            .map_err(|e| AuthError::Persist(format!("Failed to read token: {}", e)))?
            .ok_or(AuthError::NotAuthenticated)?;

        if !token.can_refresh() {
            tracing::warn!("No refresh token available; using static access token without refresh");
        }

        Ok(Self {
            provider,
            refresher,
            token,
        })
    }

    #[cfg(test)]
    fn current(&self) -> &Token {
        &self.token
    }

    /// Return a non-expired access token, refreshing if necessary.
    pub async fn get_valid_token(&mut self) -> Result<String, AuthError> {
        self.get_valid_token_at(Utc::now()).await
    }

    /// [`Self::get_valid_token`] against an explicit clock.
    pub async fn get_valid_token_at(&mut self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let Some(refresh_token) = self.token.refresh_token.clone() else {
            return Ok(self.token.access_token.clone());
        };

        let needs_refresh = match self.token.expires_at {
            Some(expires_at) => now >= expires_at - REFRESH_SKEW,
            // Unknown expiry: refresh once to learn it.
            None => true,
        };
        if !needs_refresh {
            return Ok(self.token.access_token.clone());
        }

        tracing::info!(expires_at = ?self.token.expires_at, "Access token expiring, refreshing");

        let response = self
            .refresher
            .refresh(&refresh_token)
            .await
            .map_err(|e| match e {
                ApiError::FatalAuth(msg) => AuthError::Revoked(msg),
                other => AuthError::Transient(other.to_string()),
            })?;

        let expires_at = DateTime::from_timestamp(response.expires_at, 0).ok_or_else(|| {
            AuthError::Transient(format!(
                "Token response has invalid expires_at {}",
                response.expires_at
            ))
        })?;

        let refreshed = Token {
            access_token: response.access_token,
            // Strava may rotate the refresh token; keep the old one otherwise.
            refresh_token: Some(response.refresh_token.unwrap_or(refresh_token)),
            expires_at: Some(expires_at),
        };

        self.provider
            .persist(&refreshed)
            .await
            .map_err(|e| AuthError::Persist(e.to_string()))?;

        tracing::info!(expires_at = %expires_at, "Token refreshed and persisted");
        self.token = refreshed;
        Ok(self.token.access_token.clone())
    }
}

/// JSON token file in the shape of Strava's token response.
pub struct FileTokenStore {
    path: PathBuf,
    fallback: Option<Token>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: None,
        }
    }

    /// Token to use when the file does not exist yet (seeded from environment).
    pub fn with_fallback(mut self, fallback: Option<Token>) -> Self {
        self.fallback = fallback;
        self
    }
}

#[async_trait]
impl TokenProvider for FileTokenStore {
    async fn initial_token(&self) -> Result<Option<Token>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let token: Token = serde_json::from_slice(&bytes)?;
                tracing::debug!(path = %self.path.display(), "Loaded token file");
                Ok(Some(token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.fallback.is_some() {
                    tracing::debug!(path = %self.path.display(), "Token file missing, using environment token");
                }
                Ok(self.fallback.clone())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, token: &Token) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(token)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}
