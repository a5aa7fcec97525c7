//! Error types for feed-link.

use thiserror::Error;

/// Errors produced by the live feed client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedLinkError {
    /// Establishing the streaming connection failed. Drives backoff/retry.
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An inbound frame, topic token list or payload could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A subscribe/unsubscribe query could not be written to the live connection.
    #[error("Send failed: {0}")]
    SendError(String),

    /// Retry budget exhausted; the coordinator will not reconnect on its own.
    #[error(
        "Retry budget exhausted after {total_attempts} attempt(s) ({consecutive_failures} consecutive failure(s))"
    )]
    RetriesExhausted {
        consecutive_failures: u32,
        total_attempts: u32,
    },

    /// The coordinator task is no longer running.
    #[error("Coordinator is closed")]
    Closed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for FeedLinkError {
    fn from(err: serde_json::Error) -> Self {
        FeedLinkError::SerializationError(err.to_string())
    }
}

/// Result type for feed-link operations.
pub type Result<T> = std::result::Result<T, FeedLinkError>;
