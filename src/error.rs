//! Error types for the monitoring service.
//!
//! Errors are classified by recoverability: per-user failures inside a loop
//! (fetch, scoring input, store write) are retryable-or-skippable and never
//! abort a batch; only a stop signal or an unrecoverable storage failure
//! should take the supervisor down.

use thiserror::Error;
use uuid::Uuid;

/// Failures from the environmental data provider layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected payload: {0}")]
    Payload(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient upstream conditions worth retrying on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Http(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(0)
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Service-level error type.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown user: {0}")]
    UnknownUser(Uuid),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Whether a later tick could plausibly succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MonitorError::Provider(p) => p.is_retryable(),
            MonitorError::Storage(_) | MonitorError::Io(_) => true,
            MonitorError::Serialization(_)
            | MonitorError::Validation(_)
            | MonitorError::UnknownUser(_)
            | MonitorError::Configuration(_) => false,
        }
    }
}
