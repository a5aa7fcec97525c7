use serde::{Deserialize, Serialize};

use crate::topic::Topic;

/// Kind of outbound stream query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Subscribe,
    Unsubscribe,
}

/// Client-to-server subscribe/unsubscribe request.
///
/// Serialized as `{"type": "subscribe", "stream": "hashtag", "tag": "rust"}`;
/// `list` and `tag` are only present for list and hashtag streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Subscribe or unsubscribe
    #[serde(rename = "type")]
    pub kind: QueryKind,

    /// Stream name (first wire token of the topic)
    pub stream: String,

    /// List id for list streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,

    /// Hashtag for hashtag streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ClientMessage {
    /// Subscribe query for `topic`.
    pub fn subscribe(topic: &Topic) -> Self {
        Self::for_topic(QueryKind::Subscribe, topic)
    }

    /// Unsubscribe query for `topic`.
    pub fn unsubscribe(topic: &Topic) -> Self {
        Self::for_topic(QueryKind::Unsubscribe, topic)
    }

    fn for_topic(kind: QueryKind, topic: &Topic) -> Self {
        let (list, tag) = match topic {
            Topic::List(id) => (Some(id.clone()), None),
            Topic::Hashtag(tag) | Topic::LocalHashtag(tag) => (None, Some(tag.clone())),
            _ => (None, None),
        };
        Self {
            kind,
            stream: topic.stream_name().to_string(),
            list,
            tag,
        }
    }

    /// Recover the topic this query refers to.
    pub fn topic(&self) -> crate::error::Result<Topic> {
        match (&self.list, &self.tag) {
            (Some(value), _) | (None, Some(value)) => {
                Topic::from_tokens(&[self.stream.as_str(), value.as_str()])
            },
            (None, None) => Topic::from_tokens(&[self.stream.as_str()]),
        }
    }
}
