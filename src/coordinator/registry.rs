//! Live subscribers, grouped by topic.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::{
    models::{StreamEvent, SubscriptionInfo},
    subscription::{Delivery, EventSink},
    topic::Topic,
};

/// Current time in millis since Unix epoch.
#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A `Block` subscriber whose buffer was full. The owner decides how long
/// to wait on `tx`.
pub(crate) struct BlockedSend<C> {
    pub id: u64,
    pub tx: mpsc::Sender<StreamEvent<C>>,
    pub event: StreamEvent<C>,
}

/// Result of one fan-out pass.
pub(crate) struct FanOut<C> {
    /// Subscribers that took the event immediately.
    pub delivered: usize,
    pub blocked: Vec<BlockedSend<C>>,
}

impl<C> Default for FanOut<C> {
    fn default() -> Self {
        Self {
            delivered: 0,
            blocked: Vec::new(),
        }
    }
}

struct Subscriber<C> {
    sink: EventSink<C>,
    created_at_ms: u64,
}

/// Set of registered subscribers. Owned by the coordinator task only.
pub(crate) struct SubscriberRegistry<C> {
    by_topic: HashMap<Topic, BTreeMap<u64, Subscriber<C>>>,
    topic_of: HashMap<u64, Topic>,
}

impl<C: Clone> SubscriberRegistry<C> {
    pub fn new() -> Self {
        Self {
            by_topic: HashMap::new(),
            topic_of: HashMap::new(),
        }
    }

    pub fn has_topic(&self, topic: &Topic) -> bool {
        self.by_topic.contains_key(topic)
    }

    /// Register a subscriber. Returns `true` if it is the first one for `topic`.
    pub fn insert(&mut self, id: u64, topic: Topic, sink: EventSink<C>) -> bool {
        let first = !self.by_topic.contains_key(&topic);
        self.topic_of.insert(id, topic.clone());
        self.by_topic.entry(topic).or_default().insert(
            id,
            Subscriber {
                sink,
                created_at_ms: now_ms(),
            },
        );
        first
    }

    /// Remove a subscriber, dropping its sink.
    ///
    /// Returns its topic and whether it was the last subscriber for it;
    /// `None` for unknown (already removed) ids.
    pub fn remove(&mut self, id: u64) -> Option<(Topic, bool)> {
        let topic = self.topic_of.remove(&id)?;
        let mut last = false;
        if let Some(subs) = self.by_topic.get_mut(&topic) {
            subs.remove(&id);
            if subs.is_empty() {
                self.by_topic.remove(&topic);
                last = true;
            }
        }
        Some((topic, last))
    }

    /// Distinct topics with at least one subscriber.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Offer `event` to every subscriber of `topic` without waiting.
    pub fn deliver(&self, topic: &Topic, event: StreamEvent<C>) -> FanOut<C> {
        match self.by_topic.get(topic) {
            Some(subs) => Self::fan_out(subs.iter(), event),
            None => FanOut::default(),
        }
    }

    /// Offer `event` to every subscriber regardless of topic.
    pub fn broadcast(&self, event: StreamEvent<C>) -> FanOut<C> {
        Self::fan_out(self.by_topic.values().flat_map(|subs| subs.iter()), event)
    }

    fn fan_out<'a>(
        subscribers: impl Iterator<Item = (&'a u64, &'a Subscriber<C>)>,
        event: StreamEvent<C>,
    ) -> FanOut<C>
    where
        C: 'a,
    {
        let mut out = FanOut::default();
        for (id, sub) in subscribers {
            match sub.sink.offer(event.clone()) {
                Delivery::Delivered => out.delivered += 1,
                Delivery::Dropped | Delivery::Closed => {},
                Delivery::Pending(tx, event) => out.blocked.push(BlockedSend {
                    id: *id,
                    tx,
                    event,
                }),
            }
        }
        out
    }

    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .by_topic
            .iter()
            .flat_map(|(topic, subs)| {
                subs.iter().map(move |(id, sub)| SubscriptionInfo {
                    id: *id,
                    topic: topic.clone(),
                    created_at_ms: sub.created_at_ms,
                })
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Remove every subscriber, finishing their streams. Returns how many
    /// were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.topic_of.len();
        self.topic_of.clear();
        self.by_topic.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BufferPolicy, Overflow};
    use crate::subscription::EventStream;

    fn subscriber(
        registry: &mut SubscriberRegistry<u32>,
        id: u64,
        topic: Topic,
        policy: BufferPolicy,
    ) -> (EventStream<u32>, bool) {
        let (unsub_tx, _unsub_rx) = mpsc::unbounded_channel();
        let (stream, sink) = EventStream::open(id, topic.clone(), policy, unsub_tx);
        let first = registry.insert(id, topic, sink);
        (stream, first)
    }

    #[tokio::test]
    async fn test_first_and_last_subscriber_per_topic() {
        let mut registry = SubscriberRegistry::new();
        let rust = Topic::Hashtag("rust".into());

        let (_a, first_a) = subscriber(&mut registry, 1, rust.clone(), BufferPolicy::Unbounded);
        let (_b, first_b) = subscriber(&mut registry, 2, rust.clone(), BufferPolicy::Unbounded);
        assert!(first_a);
        assert!(!first_b);
        assert_eq!(registry.topics(), vec![rust.clone()]);

        assert_eq!(registry.remove(1), Some((rust.clone(), false)));
        assert_eq!(registry.remove(2), Some((rust.clone(), true)));
        assert_eq!(registry.remove(2), None);
        assert!(registry.snapshot().is_empty());
        assert!(!registry.has_topic(&rust));
    }

    #[tokio::test]
    async fn test_deliver_matches_topic_structurally() {
        let mut registry = SubscriberRegistry::new();
        let (mut swift, _) =
            subscriber(&mut registry, 1, Topic::Hashtag("swift".into()), BufferPolicy::Unbounded);
        let (mut rust, _) =
            subscriber(&mut registry, 2, Topic::Hashtag("rust".into()), BufferPolicy::Unbounded);
        let (mut public, _) = subscriber(&mut registry, 3, Topic::Public, BufferPolicy::Unbounded);

        let out = registry.deliver(&Topic::Hashtag("swift".into()), StreamEvent::ReceivedEvent(5));

        assert_eq!(out.delivered, 1);
        assert!(out.blocked.is_empty());
        assert_eq!(swift.try_next(), Some(StreamEvent::ReceivedEvent(5)));
        assert_eq!(rust.try_next(), None);
        assert_eq!(public.try_next(), None);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_starve_others() {
        let mut registry = SubscriberRegistry::new();
        let (mut slow, _) = subscriber(
            &mut registry,
            1,
            Topic::Public,
            BufferPolicy::bounded(1, Overflow::DropNewest),
        );
        let (mut fast, _) = subscriber(&mut registry, 2, Topic::Public, BufferPolicy::Unbounded);

        for value in 0..3 {
            registry.deliver(&Topic::Public, StreamEvent::ReceivedEvent(value));
        }

        assert_eq!(slow.try_next(), Some(StreamEvent::ReceivedEvent(0)));
        assert_eq!(slow.try_next(), None);
        let mut seen = Vec::new();
        while let Some(event) = fast.try_next() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_and_clear() {
        let mut registry = SubscriberRegistry::new();
        let (mut a, _) = subscriber(&mut registry, 1, Topic::Local, BufferPolicy::Unbounded);
        let (mut b, _) = subscriber(&mut registry, 2, Topic::Direct, BufferPolicy::Unbounded);

        assert_eq!(registry.broadcast(StreamEvent::ConnectionUp).delivered, 2);
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.clear(), 2);

        assert_eq!(a.next().await, Some(StreamEvent::ConnectionUp));
        assert_eq!(a.next().await, None);
        assert_eq!(b.next().await, Some(StreamEvent::ConnectionUp));
        assert_eq!(b.next().await, None);
    }

    #[tokio::test]
    async fn test_full_block_subscriber_is_handed_back() {
        let mut registry = SubscriberRegistry::new();
        let (mut blocking, _) =
            subscriber(&mut registry, 1, Topic::Public, BufferPolicy::bounded(1, Overflow::Block));
        let (mut fast, _) = subscriber(&mut registry, 2, Topic::Public, BufferPolicy::Unbounded);

        assert!(registry.deliver(&Topic::Public, StreamEvent::ReceivedEvent(1)).blocked.is_empty());
        let out = registry.deliver(&Topic::Public, StreamEvent::ReceivedEvent(2));
        assert_eq!(out.delivered, 1);
        assert_eq!(out.blocked.len(), 1);
        assert_eq!(out.blocked[0].id, 1);
        assert_eq!(out.blocked[0].event, StreamEvent::ReceivedEvent(2));

        assert_eq!(fast.try_next(), Some(StreamEvent::ReceivedEvent(1)));
        assert_eq!(fast.try_next(), Some(StreamEvent::ReceivedEvent(2)));
        assert_eq!(blocking.try_next(), Some(StreamEvent::ReceivedEvent(1)));
        assert_eq!(blocking.try_next(), None);
    }
}
