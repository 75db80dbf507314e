// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types and the failure policy table for the backfill engine.
//!
//! Remote failures are classified into an [`ErrorClass`]; each class maps to
//! a [`FailurePolicy`] that decides whether the cycle skips the record, marks
//! it unavailable, or aborts the run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failure, used for logging and policy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network timeout, 5xx, or a 429 despite the local limiter.
    Transient,
    /// Refresh token revoked or credentials rejected.
    FatalAuth,
    /// The record no longer exists remotely.
    NotFound,
    /// Response did not match the expected shape.
    Malformed,
    /// Local store or state file could not be written.
    Storage,
}

/// What the cycle runner does with a record that failed with a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave the record incomplete; it is retried next cycle.
    SkipRecord,
    /// Mark the record complete with no data so it is never fetched again.
    MarkUnavailable,
    /// Stop the whole run.
    AbortRun,
}

impl ErrorClass {
    /// Policy table for per-record failures.
    pub fn policy(self) -> FailurePolicy {
        match self {
            ErrorClass::Transient => FailurePolicy::SkipRecord,
            ErrorClass::Malformed => FailurePolicy::SkipRecord,
            ErrorClass::NotFound => FailurePolicy::MarkUnavailable,
            ErrorClass::FatalAuth => FailurePolicy::AbortRun,
            ErrorClass::Storage => FailurePolicy::AbortRun,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::FatalAuth => "fatal_auth",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Malformed => "malformed",
            ErrorClass::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the remote API, already mapped from the provider envelope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Strava request failed (transient): {0}")]
    Transient(String),

    #[error("Strava rejected credentials: {0}")]
    FatalAuth(String),

    #[error("Strava resource not found: {0}")]
    NotFound(String),

    #[error("Unexpected Strava response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Transient(_) => ErrorClass::Transient,
            ApiError::FatalAuth(_) => ErrorClass::FatalAuth,
            ApiError::NotFound(_) => ErrorClass::NotFound,
            ApiError::Malformed(_) => ErrorClass::Malformed,
        }
    }
}

/// Token manager failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No Strava token available; run the authorization flow first")]
    NotAuthenticated,

    #[error("Refresh token rejected: {0}")]
    Revoked(String),

    #[error("Token refresh failed, will retry: {0}")]
    Transient(String),

    #[error("Failed to persist refreshed token: {0}")]
    Persist(String),
}

/// Record store and token file failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Activity {0} not found in store")]
    MissingActivity(u64),

    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// Backfill state file failures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fatal errors that stop a backfill run.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("Re-authorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("State persistence failure: {0}")]
    State(#[from] StateError),

    #[error("Failed to persist refreshed token: {0}")]
    TokenPersist(String),

    #[error("Strava response contract changed during {phase} phase: {message}")]
    Integration { phase: String, message: String },
}

impl BackfillError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackfillError::ReauthorizationRequired(_) => ErrorClass::FatalAuth,
            BackfillError::Integration { .. } => ErrorClass::Malformed,
            BackfillError::Storage(_)
            | BackfillError::State(_)
            | BackfillError::TokenPersist(_) => ErrorClass::Storage,
        }
    }

    pub fn is_reauthorization_required(&self) -> bool {
        matches!(self, BackfillError::ReauthorizationRequired(_))
    }
}

impl From<AuthError> for BackfillError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Persist(msg) => BackfillError::TokenPersist(msg),
            other => BackfillError::ReauthorizationRequired(other.to_string()),
        }
    }
}

/// Result type alias for backfill runs.
pub type Result<T> = std::result::Result<T, BackfillError>;
