//! Decoding of inbound event payloads.
//!
//! The coordinator treats payloads as opaque: it hands the event name and raw
//! payload string of every routed frame to an [`EventDecoder`]. The default
//! [`JsonEventDecoder`] keeps payloads as JSON values and maps unknown event
//! kinds to [`StreamContent::Unsupported`] instead of dropping them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{FeedLinkError, Result};

/// Turns an event name and raw payload into subscriber-facing content.
///
/// A returned error only discards that one frame; the read loop continues.
pub trait EventDecoder: Send + Sync + 'static {
    /// Decoded content delivered inside [`StreamEvent::ReceivedEvent`](crate::StreamEvent).
    type Content: Clone + fmt::Debug + Send + Sync + 'static;

    fn decode(&self, event: &str, payload: Option<&str>) -> Result<Self::Content>;
}

/// Content of a received event, as produced by [`JsonEventDecoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamContent {
    /// A new status
    Update(JsonValue),
    /// An edited status
    StatusUpdate(JsonValue),
    /// A deleted status, by id
    Delete(String),
    Notification(JsonValue),
    Conversation(JsonValue),
    /// The user's filters changed; carries no payload
    FiltersChanged,
    Announcement(JsonValue),
    AnnouncementReaction(JsonValue),
    /// A deleted announcement, by id
    AnnouncementDelete(String),
    /// An event kind this client does not know about
    Unsupported {
        event: String,
        payload: Option<String>,
    },
}

impl StreamContent {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StreamContent::Unsupported { .. })
    }
}

/// Default decoder: JSON payloads, unknown kinds surfaced as `Unsupported`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventDecoder;

impl JsonEventDecoder {
    fn json(event: &str, payload: Option<&str>) -> Result<JsonValue> {
        let raw = Self::required(event, payload)?;
        serde_json::from_str(raw).map_err(|e| {
            FeedLinkError::DecodeError(format!("Invalid '{}' payload: {}", event, e))
        })
    }

    fn required<'a>(event: &str, payload: Option<&'a str>) -> Result<&'a str> {
        payload.ok_or_else(|| {
            FeedLinkError::DecodeError(format!("Event '{}' is missing its payload", event))
        })
    }
}

impl EventDecoder for JsonEventDecoder {
    type Content = StreamContent;

    fn decode(&self, event: &str, payload: Option<&str>) -> Result<StreamContent> {
        let content = match event {
            "update" => StreamContent::Update(Self::json(event, payload)?),
            "status.update" => StreamContent::StatusUpdate(Self::json(event, payload)?),
            "delete" => StreamContent::Delete(Self::required(event, payload)?.to_string()),
            "notification" => StreamContent::Notification(Self::json(event, payload)?),
            "conversation" => StreamContent::Conversation(Self::json(event, payload)?),
            "filters_changed" => StreamContent::FiltersChanged,
            "announcement" => StreamContent::Announcement(Self::json(event, payload)?),
            "announcement.reaction" => {
                StreamContent::AnnouncementReaction(Self::json(event, payload)?)
            },
            "announcement.delete" => {
                StreamContent::AnnouncementDelete(Self::required(event, payload)?.to_string())
            },
            other => StreamContent::Unsupported {
                event: other.to_string(),
                payload: payload.map(str::to_string),
            },
        };
        Ok(content)
    }
}
