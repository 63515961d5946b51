//! Error types for the plugin protocol host.

use std::time::Duration;

/// Errors produced while speaking the host protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error on the stdio streams.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A message that needs a payload arrived without one.
    #[error("The '{method}' message has no payload.")]
    MissingPayload {
        /// Method of the message.
        method: String,
    },

    /// A protocol version string could not be parsed.
    #[error("Invalid protocol version '{0}'.")]
    InvalidVersion(String),

    /// The connection is closed; no more messages can be exchanged.
    #[error("The plugin connection is closed.")]
    ConnectionClosed,

    /// The peer did not answer an outbound request in time.
    #[error("Request '{method}' timed out after {}ms.", .after.as_millis())]
    Timeout {
        /// Method of the request.
        method: String,
        /// Time waited.
        after: Duration,
    },

    /// The peer answered an outbound request with a fault.
    #[error("The host returned a fault: {0}")]
    Fault(String),

    /// Protocol version negotiation failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
