//! Unified error types for the sync core
//!
//! Variants follow the failure taxonomy the orchestrator acts on:
//! transient upstream errors are retried, auth errors abort a single
//! account, shape errors skip a single message, conflicts are benign.

use thiserror::Error;

/// Error type shared by connectors, store adapters and sync services.
///
/// Payloads are plain strings so errors can be cloned into run summaries
/// and serialized for callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Network hiccup or rate limit upstream. Safe to retry with backoff.
    #[error("Transient upstream error: {0}")]
    TransientUpstream(String),

    /// Credentials rejected by the platform. Fatal for that account only.
    #[error("Upstream authentication error: {0}")]
    UpstreamAuth(String),

    /// Upstream payload did not match the expected shape. The offending
    /// message is skipped, the conversation continues.
    #[error("Malformed upstream data: {0}")]
    DataShape(String),

    /// Unique-key collision at persistence. Handled as update-or-skip.
    #[error("Duplicate key conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether the orchestrator's retry loop may re-attempt the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientUpstream(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SyncError::Conflict(e.to_string())
            }
            _ => SyncError::Database(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(e: r2d2::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::DataShape(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
