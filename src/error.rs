//! Error types for the tollgate library.

use thiserror::Error;

/// Main error type for tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiter construction errors
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    /// Upstream transport errors
    #[error("Upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Upstream returned a non-success status
    #[error("Upstream returned status {0}")]
    UpstreamStatus(reqwest::StatusCode),

    /// Upstream response body exceeded the allowed size
    #[error("Upstream response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Malformed payloads from the upstream
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
