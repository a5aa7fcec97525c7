//! Subscribable live feed channels and their wire token encoding.
//!
//! A [`Topic`] encodes to one or two wire tokens: the stream name
//! (colon-joined, e.g. `public:local:media`) followed by the associated value
//! for hashtag and list streams.
//!
//! Decoding accepts the canonical form as well as the colon-split form some
//! servers emit (`["public", "local", "media"]`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FeedLinkError, Result};

const PUBLIC: &str = "public";
const PUBLIC_MEDIA: &str = "public:media";
const LOCAL: &str = "public:local";
const LOCAL_MEDIA: &str = "public:local:media";
const REMOTE: &str = "public:remote";
const REMOTE_MEDIA: &str = "public:remote:media";
const HASHTAG: &str = "hashtag";
const LOCAL_HASHTAG: &str = "hashtag:local";
const USER: &str = "user";
const USER_NOTIFICATION: &str = "user:notification";
const LIST: &str = "list";
const DIRECT: &str = "direct";

/// A named, subscribable channel on the remote event source.
///
/// Equality is structural, so `Hashtag("rust")` and `Hashtag("swift")` are
/// different topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Topic {
    /// All public statuses.
    Public,
    /// Public statuses with media attachments.
    PublicMedia,
    /// Statuses local to the server.
    Local,
    /// Local statuses with media attachments.
    LocalMedia,
    /// Statuses from remote servers.
    Remote,
    /// Remote statuses with media attachments.
    RemoteMedia,
    /// Public statuses carrying a hashtag.
    Hashtag(String),
    /// Local statuses carrying a hashtag.
    LocalHashtag(String),
    /// The authenticated user's home timeline.
    UserHome,
    /// The authenticated user's notifications.
    UserNotifications,
    /// A list timeline, by list id.
    List(String),
    /// Direct conversations.
    Direct,
}

impl Topic {
    /// Stream name as it appears in the first wire token.
    pub fn stream_name(&self) -> &'static str {
        match self {
            Topic::Public => PUBLIC,
            Topic::PublicMedia => PUBLIC_MEDIA,
            Topic::Local => LOCAL,
            Topic::LocalMedia => LOCAL_MEDIA,
            Topic::Remote => REMOTE,
            Topic::RemoteMedia => REMOTE_MEDIA,
            Topic::Hashtag(_) => HASHTAG,
            Topic::LocalHashtag(_) => LOCAL_HASHTAG,
            Topic::UserHome => USER,
            Topic::UserNotifications => USER_NOTIFICATION,
            Topic::List(_) => LIST,
            Topic::Direct => DIRECT,
        }
    }

    /// Canonical wire token sequence for this topic.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.stream_name().to_string()];
        match self {
            Topic::Hashtag(tag) | Topic::LocalHashtag(tag) => tokens.push(tag.clone()),
            Topic::List(id) => tokens.push(id.clone()),
            _ => {},
        }
        tokens
    }

    /// Decode a wire token sequence.
    ///
    /// Fails for unknown stream names, a missing or empty associated value
    /// (e.g. `["hashtag"]`), or trailing tokens on a value-less stream.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Topic> {
        let first = match tokens.first() {
            Some(first) => first.as_ref(),
            None => return Err(FeedLinkError::DecodeError("Empty stream token list".to_string())),
        };

        let with_value = |build: fn(String) -> Topic| -> Result<Topic> {
            match tokens {
                [_, value] if !value.as_ref().is_empty() => Ok(build(value.as_ref().to_string())),
                [_] => Err(FeedLinkError::DecodeError(format!(
                    "Stream '{}' requires an associated value",
                    first
                ))),
                _ => Err(FeedLinkError::DecodeError(format!(
                    "Malformed '{}' stream tokens: {:?}",
                    first,
                    tokens.iter().map(|t| t.as_ref()).collect::<Vec<_>>()
                ))),
            }
        };

        match first {
            HASHTAG => return with_value(Topic::Hashtag),
            LOCAL_HASHTAG => return with_value(Topic::LocalHashtag),
            LIST => return with_value(Topic::List),
            _ => {},
        }

        let name = tokens.iter().map(|t| t.as_ref()).collect::<Vec<_>>().join(":");
        match name.as_str() {
            PUBLIC => Ok(Topic::Public),
            PUBLIC_MEDIA => Ok(Topic::PublicMedia),
            LOCAL => Ok(Topic::Local),
            LOCAL_MEDIA => Ok(Topic::LocalMedia),
            REMOTE => Ok(Topic::Remote),
            REMOTE_MEDIA => Ok(Topic::RemoteMedia),
            USER => Ok(Topic::UserHome),
            USER_NOTIFICATION => Ok(Topic::UserNotifications),
            DIRECT => Ok(Topic::Direct),
            other => Err(FeedLinkError::DecodeError(format!("Unknown stream '{}'", other))),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Hashtag(value) | Topic::LocalHashtag(value) | Topic::List(value) => {
                write!(f, "{}/{}", self.stream_name(), value)
            },
            _ => f.write_str(self.stream_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_topics() -> Vec<Topic> {
        vec![
            Topic::Public,
            Topic::PublicMedia,
            Topic::Local,
            Topic::LocalMedia,
            Topic::Remote,
            Topic::RemoteMedia,
            Topic::Hashtag("rust".to_string()),
            Topic::LocalHashtag("swift".to_string()),
            Topic::UserHome,
            Topic::UserNotifications,
            Topic::List("42".to_string()),
            Topic::Direct,
        ]
    }

    #[test]
    fn test_every_topic_decodes_back() {
        for topic in all_topics() {
            let tokens = topic.to_tokens();
            assert_eq!(Topic::from_tokens(&tokens).unwrap(), topic, "tokens {:?}", tokens);
        }
    }

    #[test]
    fn test_canonical_tokens() {
        assert_eq!(Topic::Public.to_tokens(), vec!["public"]);
        assert_eq!(Topic::LocalMedia.to_tokens(), vec!["public:local:media"]);
        assert_eq!(Topic::Hashtag("rust".into()).to_tokens(), vec!["hashtag", "rust"]);
        assert_eq!(Topic::LocalHashtag("rust".into()).to_tokens(), vec!["hashtag:local", "rust"]);
        assert_eq!(Topic::UserNotifications.to_tokens(), vec!["user:notification"]);
        assert_eq!(Topic::List("7".into()).to_tokens(), vec!["list", "7"]);
    }

    #[test]
    fn test_split_form_is_accepted() {
        assert_eq!(Topic::from_tokens(&["public", "local"]).unwrap(), Topic::Local);
        assert_eq!(Topic::from_tokens(&["public", "remote", "media"]).unwrap(), Topic::RemoteMedia);
        assert_eq!(Topic::from_tokens(&["user", "notification"]).unwrap(), Topic::UserNotifications);
    }

    #[test]
    fn test_split_form_round_trips_for_every_topic() {
        let table: Vec<(Vec<&str>, Topic)> = vec![
            (vec!["public"], Topic::Public),
            (vec!["public", "media"], Topic::PublicMedia),
            (vec!["public", "local"], Topic::Local),
            (vec!["public", "local", "media"], Topic::LocalMedia),
            (vec!["public", "remote"], Topic::Remote),
            (vec!["public", "remote", "media"], Topic::RemoteMedia),
            (vec!["hashtag", "rust"], Topic::Hashtag("rust".into())),
            (vec!["hashtag:local", "rust"], Topic::LocalHashtag("rust".into())),
            (vec!["user"], Topic::UserHome),
            (vec!["user", "notification"], Topic::UserNotifications),
            (vec!["list", "42"], Topic::List("42".into())),
            (vec!["direct"], Topic::Direct),
        ];
        assert_eq!(table.len(), all_topics().len());

        for (split, topic) in table {
            let decoded = Topic::from_tokens(&split).unwrap();
            assert_eq!(decoded, topic, "split tokens {:?}", split);

            let canonical = decoded.to_tokens();
            assert_eq!(Topic::from_tokens(&canonical).unwrap(), topic);
            assert_eq!(canonical.join(":"), split.join(":"));
        }
    }

    #[test]
    fn test_missing_associated_value_fails() {
        assert!(Topic::from_tokens(&["hashtag"]).is_err());
        assert!(Topic::from_tokens(&["hashtag:local"]).is_err());
        assert!(Topic::from_tokens(&["list"]).is_err());
        assert!(Topic::from_tokens(&["list", ""]).is_err());
    }

    #[test]
    fn test_malformed_tokens_fail() {
        let empty: [&str; 0] = [];
        assert!(Topic::from_tokens(&empty).is_err());
        assert!(Topic::from_tokens(&["federated"]).is_err());
        assert!(Topic::from_tokens(&["hashtag", "a", "b"]).is_err());
        assert!(Topic::from_tokens(&["direct", "extra"]).is_err());
    }

    #[test]
    fn test_structural_equality() {
        assert_ne!(Topic::Hashtag("rust".into()), Topic::Hashtag("swift".into()));
        assert_ne!(Topic::Hashtag("rust".into()), Topic::LocalHashtag("rust".into()));
        assert_eq!(Topic::List("1".into()), Topic::List("1".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Topic::Local.to_string(), "public:local");
        assert_eq!(Topic::Hashtag("rust".into()).to_string(), "hashtag/rust");
    }
}
