use serde::{Deserialize, Serialize};

use crate::error::{FeedLinkError, Result};
use crate::topic::Topic;

/// Inbound event frame sent by the streaming server.
///
/// ```json
/// {"stream": ["hashtag", "rust"], "event": "update", "payload": "{...}"}
/// ```
///
/// The payload is an opaque string (usually JSON-encoded) handed to the
/// configured [`EventDecoder`](crate::decoder::EventDecoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Stream tokens identifying the topic
    pub stream: Vec<String>,

    /// Event kind, e.g. `update`, `delete`, `notification`
    pub event: String,

    /// Opaque event payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ServerMessage {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FeedLinkError::DecodeError(format!("Invalid event frame: {}", e)))
    }

    /// Topic this frame is addressed to.
    pub fn topic(&self) -> Result<Topic> {
        Topic::from_tokens(&self.stream)
    }
}
