//! Core error types.

use thiserror::Error;

/// Errors from token-info parsing, token exchange and log delivery.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The token-info JSON is malformed or missing required fields.
    #[error("invalid token info: {0}")]
    InvalidTokenInfo(String),

    /// A URL could not be used.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The token endpoint call failed at the transport level.
    #[error("{0}")]
    Http(String),

    /// A compact signed token could not be decoded.
    #[error("{0}")]
    InvalidJwt(String),

    /// A log line could not be delivered to the host.
    #[error("host log delivery failed: {0}")]
    HostSink(String),

    /// JSON (de)serialization error.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
