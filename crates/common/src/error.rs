//! Error types for clickrush.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Caller Errors ===
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Admission was rejected by a rate limit. Retryable once the window
    /// resets; `reset_at` tells the caller when.
    #[error("Rate limited until {reset_at}")]
    RateLimited {
        /// When the rate limit window resets.
        reset_at: DateTime<Utc>,
    },

    // === Server Errors ===
    /// The backing store is unavailable or an operation against it failed.
    ///
    /// Never downgraded to an implicit "allowed"/"empty" answer: the rate
    /// limiter and job store exist to bound outbound throughput, and a
    /// silent fallback would defeat that guarantee.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for telemetry and operator-facing output.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Store(_) => "STORE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether the caller may retry the operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Store(_) | Self::Transport(_)
        )
    }
}

// === From implementations ===

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Validation("x".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(AppError::Store("down".into()).error_code(), "STORE_ERROR");
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::RateLimited { reset_at: Utc::now() }.is_retryable());
        assert!(AppError::Store("down".into()).is_retryable());
        assert!(!AppError::Validation("bad".into()).is_retryable());
    }
}
