//! Subscription coordinator over one shared streaming connection.
//!
//! The public [`StreamCoordinator`] handle is a thin command sender; all
//! state lives in a background task (see `task.rs`) which:
//!
//! - opens the connection lazily on the first subscription
//! - sends one subscribe query per topic, however many subscribers share it
//! - routes every inbound event to the subscribers of its topic
//! - reconnects with exponential backoff and replays the topic set
//! - gives up once the retry budget is spent, finishing every stream

mod registry;
mod retry;
mod task;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{
    connection::Connector,
    decoder::{EventDecoder, JsonEventDecoder},
    error::{FeedLinkError, Result},
    event_handlers::EventHandlers,
    models::{BufferPolicy, ConnectionState, StreamingOptions, SubscriptionInfo},
    subscription::EventStream,
    topic::Topic,
};
use task::{ConnCmd, ConnectionTask};

/// Capacity of the handle → task command channel.
const COMMAND_BUFFER: usize = 256;

/// Handle to a running subscription coordinator.
///
/// Cheap to share behind an `Arc`. Dropping the last handle stops the
/// background task: the live connection is closed and every
/// [`EventStream`] finishes.
///
/// # Example
///
/// ```rust,no_run
/// use feed_link::{StreamCoordinator, StreamingOptions, Topic, WsConnector};
///
/// # async fn example() -> feed_link::Result<()> {
/// let connector = WsConnector::builder()
///     .base_url("https://social.example")
///     .access_token("token")
///     .build()?;
/// let coordinator = StreamCoordinator::builder()
///     .connector(connector)
///     .options(StreamingOptions::default().with_max_retries(3))
///     .build()?;
///
/// let mut home = coordinator.subscribe(Topic::UserHome).await?;
/// let mut rust = coordinator.subscribe(Topic::Hashtag("rust".into())).await?;
/// # let _ = (home.next().await, rust.next().await);
/// coordinator.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamCoordinator<D: EventDecoder = JsonEventDecoder> {
    cmd_tx: mpsc::Sender<ConnCmd<D::Content>>,
    state_rx: watch::Receiver<ConnectionState>,
    default_policy: BufferPolicy,
    _task: JoinHandle<()>,
}

impl StreamCoordinator<JsonEventDecoder> {
    /// Builder with the default JSON decoder.
    pub fn builder() -> StreamCoordinatorBuilder<JsonEventDecoder> {
        StreamCoordinatorBuilder::new(JsonEventDecoder)
    }

    /// Coordinator with default decoder and handlers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(connector: impl Connector, options: StreamingOptions) -> Result<Self> {
        Self::builder().connector(connector).options(options).build()
    }
}

impl<D: EventDecoder> StreamCoordinator<D> {
    /// Subscribe to `topic` with the default buffer policy from
    /// [`StreamingOptions::buffer_policy`].
    pub async fn subscribe(&self, topic: Topic) -> Result<EventStream<D::Content>> {
        self.subscribe_with_policy(topic, self.default_policy).await
    }

    /// Subscribe to `topic`.
    ///
    /// Starts the connection if none is running. If a connection is live and
    /// this is the first subscriber of `topic`, the subscribe query is sent
    /// before returning; a failed send is returned as an error and nothing is
    /// registered.
    pub async fn subscribe_with_policy(
        &self,
        topic: Topic,
        policy: BufferPolicy,
    ) -> Result<EventStream<D::Content>> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Subscribe {
                topic,
                policy,
                result_tx,
            })
            .await
            .map_err(|_| FeedLinkError::Closed)?;
        result_rx.await.map_err(|_| FeedLinkError::Closed)?
    }

    /// Close the connection, stop reconnecting and finish every stream.
    ///
    /// Idempotent. A later `subscribe` starts a fresh connection with a
    /// fresh retry budget.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(ConnCmd::Disconnect { done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Snapshot of the live subscribers, ordered by id.
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::ListSubscriptions { result_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        result_rx.await.unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel following every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

impl<D: EventDecoder> std::fmt::Debug for StreamCoordinator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("state", &self.state())
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

/// Builder for [`StreamCoordinator`].
pub struct StreamCoordinatorBuilder<D> {
    connector: Option<Arc<dyn Connector>>,
    decoder: D,
    options: StreamingOptions,
    event_handlers: EventHandlers,
}

impl<D: EventDecoder> StreamCoordinatorBuilder<D> {
    fn new(decoder: D) -> Self {
        Self {
            connector: None,
            decoder,
            options: StreamingOptions::default(),
            event_handlers: EventHandlers::default(),
        }
    }

    /// Transport used for every connection attempt. Required.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Replace the payload decoder, changing the stream content type.
    pub fn decoder<D2: EventDecoder>(self, decoder: D2) -> StreamCoordinatorBuilder<D2> {
        StreamCoordinatorBuilder {
            connector: self.connector,
            decoder,
            options: self.options,
            event_handlers: self.event_handlers,
        }
    }

    pub fn options(mut self, options: StreamingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Spawn the coordinator task on the current tokio runtime.
    ///
    /// No connection is opened until the first subscription.
    pub fn build(self) -> Result<StreamCoordinator<D>> {
        let connector = self.connector.ok_or_else(|| {
            FeedLinkError::ConfigurationError("a connector is required".to_string())
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            FeedLinkError::ConfigurationError(format!(
                "StreamCoordinator must be built inside a tokio runtime: {}",
                e
            ))
        })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let default_policy = self.options.buffer_policy;

        let task = ConnectionTask::new(
            cmd_rx,
            state_tx,
            connector,
            self.decoder,
            self.options,
            self.event_handlers,
        );
        let handle = runtime.spawn(task.run());

        Ok(StreamCoordinator {
            cmd_tx,
            state_rx,
            default_policy,
            _task: handle,
        })
    }
}

impl<D> std::fmt::Debug for StreamCoordinatorBuilder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinatorBuilder")
            .field("has_connector", &self.connector.is_some())
            .field("options", &self.options)
            .field("event_handlers", &self.event_handlers)
            .finish()
    }
}
