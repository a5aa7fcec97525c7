//! Consumer side of a subscription.
//!
//! Every subscriber owns one event channel built from its [`BufferPolicy`]:
//!
//! - `Unbounded`: tokio unbounded mpsc
//! - `Bounded` + `DropNewest` / `Block`: bounded mpsc (`try_send` / awaited `send`)
//! - `Bounded` + `DropOldest`: a fixed-capacity ring that evicts its oldest
//!   entry on overflow
//!
//! The coordinator keeps the [`EventSink`] half; the consumer gets an
//! [`EventStream`]. Dropping the sink finishes the stream, dropping or closing
//! the stream unsubscribes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use tokio::sync::{
    mpsc::{self, error::TryRecvError, error::TrySendError},
    oneshot, Notify,
};

use crate::{
    decoder::StreamContent,
    error::Result,
    models::{BufferPolicy, Overflow, StreamEvent, MAX_BUFFER_CAPACITY},
    topic::Topic,
};

/// Unsubscribe request sent from an [`EventStream`] to the coordinator task.
#[derive(Debug)]
pub(crate) struct UnsubscribeRequest {
    pub id: u64,
    /// Present for explicit `close()`, absent when triggered by `Drop`.
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

/// Outcome of a non-blocking delivery attempt.
pub(crate) enum Delivery<C> {
    Delivered,
    /// Buffer full, event discarded per policy.
    Dropped,
    /// Consumer is gone.
    Closed,
    /// `Block` policy with a full buffer: the caller must await the send.
    Pending(mpsc::Sender<StreamEvent<C>>, StreamEvent<C>),
}

// ── Drop-oldest ring ────────────────────────────────────────────────────────

struct RingState<C> {
    buffer: VecDeque<StreamEvent<C>>,
    /// Evicted since the consumer last looked.
    evicted: u64,
    sender_alive: bool,
    receiver_alive: bool,
}

struct Ring<C> {
    capacity: usize,
    state: Mutex<RingState<C>>,
    /// Single consumer, so `notify_one` permits never get lost.
    notify: Notify,
}

impl<C> Ring<C> {
    fn lock(&self) -> MutexGuard<'_, RingState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half of the ring, held by the coordinator.
pub(crate) struct RingSender<C>(Arc<Ring<C>>);

impl<C> RingSender<C> {
    fn push(&self, event: StreamEvent<C>) -> Delivery<C> {
        {
            let mut state = self.0.lock();
            if !state.receiver_alive {
                return Delivery::Closed;
            }
            if state.buffer.len() >= self.0.capacity {
                state.buffer.pop_front();
                state.evicted += 1;
            }
            state.buffer.push_back(event);
        }
        self.0.notify.notify_one();
        Delivery::Delivered
    }
}

impl<C> Drop for RingSender<C> {
    fn drop(&mut self) {
        self.0.lock().sender_alive = false;
        self.0.notify.notify_one();
    }
}

struct RingReceiver<C>(Arc<Ring<C>>);

impl<C> RingReceiver<C> {
    fn try_recv(&self) -> Option<StreamEvent<C>> {
        let mut state = self.0.lock();
        if state.evicted > 0 {
            log::debug!("[feed-link] Slow subscriber dropped {} oldest event(s)", state.evicted);
            state.evicted = 0;
        }
        state.buffer.pop_front()
    }

    async fn recv(&self) -> Option<StreamEvent<C>> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if !self.0.lock().sender_alive {
                return None;
            }
            self.0.notify.notified().await;
        }
    }

    fn close(&self) {
        let mut state = self.0.lock();
        state.receiver_alive = false;
        state.buffer.clear();
    }
}

impl<C> Drop for RingReceiver<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn ring<C>(capacity: usize) -> (RingSender<C>, RingReceiver<C>) {
    let ring = Arc::new(Ring {
        capacity,
        state: Mutex::new(RingState {
            buffer: VecDeque::new(),
            evicted: 0,
            sender_alive: true,
            receiver_alive: true,
        }),
        notify: Notify::new(),
    });
    (RingSender(ring.clone()), RingReceiver(ring))
}

// ── Sinks and receivers ─────────────────────────────────────────────────────

/// Coordinator-held half of a subscriber channel.
pub(crate) enum EventSink<C> {
    Unbounded(mpsc::UnboundedSender<StreamEvent<C>>),
    DropNewest(mpsc::Sender<StreamEvent<C>>),
    Block(mpsc::Sender<StreamEvent<C>>),
    DropOldest(RingSender<C>),
}

impl<C> EventSink<C> {
    pub fn offer(&self, event: StreamEvent<C>) -> Delivery<C> {
        match self {
            EventSink::Unbounded(tx) => match tx.send(event) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
            EventSink::DropNewest(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => Delivery::Dropped,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            EventSink::Block(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(event)) => Delivery::Pending(tx.clone(), event),
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            EventSink::DropOldest(ring) => ring.push(event),
        }
    }
}

enum EventReceiver<C> {
    Unbounded(mpsc::UnboundedReceiver<StreamEvent<C>>),
    Bounded(mpsc::Receiver<StreamEvent<C>>),
    Ring(RingReceiver<C>),
}

impl<C> EventReceiver<C> {
    async fn recv(&mut self) -> Option<StreamEvent<C>> {
        match self {
            EventReceiver::Unbounded(rx) => rx.recv().await,
            EventReceiver::Bounded(rx) => rx.recv().await,
            EventReceiver::Ring(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<StreamEvent<C>> {
        match self {
            EventReceiver::Unbounded(rx) => match rx.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            },
            EventReceiver::Bounded(rx) => match rx.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            },
            EventReceiver::Ring(rx) => rx.try_recv(),
        }
    }

    /// Refuse further events. Fails any send currently blocked on a full buffer.
    fn close(&mut self) {
        match self {
            EventReceiver::Unbounded(rx) => rx.close(),
            EventReceiver::Bounded(rx) => rx.close(),
            EventReceiver::Ring(rx) => rx.close(),
        }
    }
}

/// Build the sink/receiver pair for `policy`.
fn event_channel<C>(policy: BufferPolicy) -> (EventSink<C>, EventReceiver<C>) {
    match policy {
        BufferPolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSink::Unbounded(tx), EventReceiver::Unbounded(rx))
        },
        BufferPolicy::Bounded { capacity, overflow } => {
            let capacity = capacity.clamp(1, MAX_BUFFER_CAPACITY);
            match overflow {
                Overflow::DropOldest => {
                    let (tx, rx) = ring(capacity);
                    (EventSink::DropOldest(tx), EventReceiver::Ring(rx))
                },
                Overflow::DropNewest => {
                    let (tx, rx) = mpsc::channel(capacity);
                    (EventSink::DropNewest(tx), EventReceiver::Bounded(rx))
                },
                Overflow::Block => {
                    let (tx, rx) = mpsc::channel(capacity);
                    (EventSink::Block(tx), EventReceiver::Bounded(rx))
                },
            }
        },
    }
}

/// A subscriber's stream of [`StreamEvent`]s for one [`Topic`].
///
/// Returned by [`StreamCoordinator::subscribe`](crate::StreamCoordinator::subscribe).
/// `next()` yields `None` once the coordinator has finished the stream
/// (disconnect, retry budget exhausted) or after [`close`](Self::close).
///
/// Dropping an open stream unsubscribes in the background.
///
/// # Examples
///
/// ```rust,no_run
/// use feed_link::{StreamCoordinator, StreamEvent, Topic, WsConnector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = WsConnector::builder().base_url("https://social.example").build()?;
/// let coordinator = StreamCoordinator::builder().connector(connector).build()?;
///
/// let mut stream = coordinator.subscribe(Topic::Hashtag("rust".into())).await?;
/// while let Some(event) = stream.next().await {
///     match event {
///         StreamEvent::ReceivedEvent(content) => println!("{:?}", content),
///         StreamEvent::ConnectionDown => println!("reconnecting..."),
///         StreamEvent::ConnectionUp => println!("live"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventStream<C = StreamContent> {
    id: u64,
    topic: Topic,
    receiver: EventReceiver<C>,
    unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeRequest>,
    closed: bool,
}

impl<C: Clone> EventStream<C> {
    /// Create the consumer stream and the sink the coordinator keeps.
    pub(crate) fn open(
        id: u64,
        topic: Topic,
        policy: BufferPolicy,
        unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeRequest>,
    ) -> (Self, EventSink<C>) {
        let (sink, receiver) = event_channel(policy);
        let stream = Self {
            id,
            topic,
            receiver,
            unsubscribe_tx,
            closed: false,
        };
        (stream, sink)
    }

    /// Subscriber id, unique within one coordinator.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the next event. `None` means the stream is finished.
    pub async fn next(&mut self) -> Option<StreamEvent<C>> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// Next buffered event, without waiting.
    pub fn try_next(&mut self) -> Option<StreamEvent<C>> {
        if self.closed {
            return None;
        }
        self.receiver.try_recv()
    }

    /// Unsubscribe explicitly.
    ///
    /// Idempotent. Returns the send error if the unsubscribe query could not
    /// be written to the live connection; the subscriber is removed either way.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Unblocks a coordinator waiting on this subscriber's full buffer.
        self.receiver.close();

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = UnsubscribeRequest {
            id: self.id,
            reply: Some(reply_tx),
        };
        if self.unsubscribe_tx.send(request).is_err() {
            // Coordinator already gone, nothing left to unsubscribe from.
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }

    /// Adapt into a [`futures_util::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent<C>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }
}

impl<C> Drop for EventStream<C> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.unsubscribe_tx.send(UnsubscribeRequest {
                id: self.id,
                reply: None,
            });
        }
    }
}

impl<C> std::fmt::Debug for EventStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn open(policy: BufferPolicy) -> (
        EventStream<u32>,
        EventSink<u32>,
        mpsc::UnboundedReceiver<UnsubscribeRequest>,
    ) {
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();
        let (stream, sink) = EventStream::open(1, Topic::Public, policy, unsub_tx);
        (stream, sink, unsub_rx)
    }

    fn offer_all(sink: &EventSink<u32>, values: &[u32]) {
        for value in values {
            let _ = sink.offer(StreamEvent::ReceivedEvent(*value));
        }
    }

    fn drain(stream: &mut EventStream<u32>) -> Vec<u32> {
        let mut seen = Vec::new();
        while let Some(event) = stream.try_next() {
            seen.extend(event.into_content());
        }
        seen
    }

    #[tokio::test]
    async fn test_unbounded_keeps_everything_in_order() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::Unbounded);
        offer_all(&sink, &[1, 2, 3, 4]);
        assert_eq!(drain(&mut stream), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_drop_newest_discards_incoming() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(2, Overflow::DropNewest));
        offer_all(&sink, &[1, 2]);
        assert!(matches!(sink.offer(StreamEvent::ReceivedEvent(3)), Delivery::Dropped));
        assert_eq!(drain(&mut stream), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_latest() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(2, Overflow::DropOldest));
        offer_all(&sink, &[1, 2, 3]);
        assert_eq!(stream.next().await, Some(StreamEvent::ReceivedEvent(2)));
        assert_eq!(stream.next().await, Some(StreamEvent::ReceivedEvent(3)));
    }

    #[tokio::test]
    async fn test_drop_oldest_holds_exactly_capacity() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(3, Overflow::DropOldest));
        offer_all(&sink, &(0..10).collect::<Vec<_>>());
        assert_eq!(drain(&mut stream), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_drop_oldest_wakes_waiting_consumer() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(1, Overflow::DropOldest));
        let reader = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;
        offer_all(&sink, &[5]);
        assert_eq!(reader.await.unwrap(), Some(StreamEvent::ReceivedEvent(5)));
    }

    #[tokio::test]
    async fn test_huge_capacity_is_clamped() {
        let policy: BufferPolicy =
            serde_json::from_str(&format!(r#"{{"mode":"bounded","capacity":{},"overflow":"block"}}"#, usize::MAX))
                .unwrap();
        let (mut stream, sink, _unsub) = open(policy);
        offer_all(&sink, &[1, 2]);
        assert_eq!(drain(&mut stream), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_close_fails_pending_block_send() {
        let (mut stream, sink, mut unsub) = open(BufferPolicy::bounded(1, Overflow::Block));
        offer_all(&sink, &[1]);
        let Delivery::Pending(tx, event) = sink.offer(StreamEvent::ReceivedEvent(2)) else {
            panic!("expected pending delivery");
        };
        let send = tokio::spawn(async move { tx.send(event).await.is_err() });

        let responder = tokio::spawn(async move {
            let request = unsub.recv().await.unwrap();
            request.reply.unwrap().send(Ok(())).unwrap();
        });
        assert!(stream.close().await.is_ok());
        assert!(send.await.unwrap());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_ring_refuses_events() {
        let (mut stream, sink, mut unsub) = open(BufferPolicy::bounded(2, Overflow::DropOldest));
        let responder = tokio::spawn(async move {
            let request = unsub.recv().await.unwrap();
            request.reply.unwrap().send(Ok(())).unwrap();
        });
        assert!(stream.close().await.is_ok());
        responder.await.unwrap();
        assert!(matches!(sink.offer(StreamEvent::ConnectionUp), Delivery::Closed));
    }

    #[tokio::test]
    async fn test_block_reports_pending_when_full() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(1, Overflow::Block));
        assert!(matches!(sink.offer(StreamEvent::ReceivedEvent(1)), Delivery::Delivered));
        let pending = sink.offer(StreamEvent::ReceivedEvent(2));
        let Delivery::Pending(tx, event) = pending else {
            panic!("expected pending delivery");
        };

        let send = tokio::spawn(async move { tx.send(event).await.is_ok() });
        assert_eq!(stream.next().await, Some(StreamEvent::ReceivedEvent(1)));
        assert!(send.await.unwrap());
        assert_eq!(stream.next().await, Some(StreamEvent::ReceivedEvent(2)));
    }

    #[tokio::test]
    async fn test_dropping_sink_finishes_stream() {
        let (mut stream, sink, _unsub) = open(BufferPolicy::bounded(4, Overflow::DropOldest));
        offer_all(&sink, &[7]);
        drop(sink);
        assert_eq!(stream.next().await, Some(StreamEvent::ReceivedEvent(7)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_closed_consumer_is_reported() {
        let (stream, sink, _unsub) = open(BufferPolicy::Unbounded);
        drop(stream);
        assert!(matches!(sink.offer(StreamEvent::ConnectionUp), Delivery::Closed));
    }

    #[tokio::test]
    async fn test_drop_sends_unsubscribe_once() {
        let (stream, _sink, mut unsub) = open(BufferPolicy::Unbounded);
        drop(stream);
        let request = unsub.recv().await.unwrap();
        assert_eq!(request.id, 1);
        assert!(request.reply.is_none());
        assert!(unsub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_suppresses_drop() {
        let (mut stream, _sink, mut unsub) = open(BufferPolicy::Unbounded);

        let responder = tokio::spawn(async move {
            let request = unsub.recv().await.unwrap();
            request.reply.unwrap().send(Ok(())).unwrap();
            unsub
        });

        assert!(stream.close().await.is_ok());
        assert!(stream.close().await.is_ok());
        assert!(stream.is_closed());
        assert_eq!(stream.next().await, None);

        let mut unsub = responder.await.unwrap();
        drop(stream);
        assert!(unsub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_into_stream_ends_with_sink() {
        let (stream, sink, _unsub) = open(BufferPolicy::Unbounded);
        offer_all(&sink, &[1, 2]);
        drop(sink);
        let collected: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(
            collected,
            vec![StreamEvent::ReceivedEvent(1), StreamEvent::ReceivedEvent(2)]
        );
    }
}
