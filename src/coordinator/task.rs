//! Background connection task.
//!
//! Owns the subscriber registry, the retry counters and (while connected)
//! the single live [`Connection`]. Everything that mutates them runs here,
//! one input at a time:
//!
//! ```text
//! Idle ──subscribe──▶ Connecting ──ok──▶ Connected ──lost──▶ Backoff ──▶ Connecting …
//!                        │  └─fail──────────────────────────▶ Backoff
//!                        └─ budget exhausted / disconnect ──▶ Terminated (= Idle)
//! ```
//!
//! Commands and unsubscribe requests are served in every state, so a
//! subscriber registered during `Connecting` or `Backoff` is covered by the
//! next resubscribe batch. They are also served while the task waits on a
//! full `Block` subscriber, which is why that wait can be interrupted.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::registry::{BlockedSend, SubscriberRegistry};
use super::retry::RetryCounters;
use crate::{
    connection::{Connection, Connector},
    decoder::EventDecoder,
    error::{FeedLinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    models::{
        BufferPolicy, ClientMessage, ConnectionState, ServerMessage, StreamEvent,
        StreamingOptions, SubscriptionInfo,
    },
    subscription::{EventStream, UnsubscribeRequest},
    topic::Topic,
};

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public handle to the background task.
pub(crate) enum ConnCmd<C> {
    Subscribe {
        topic: Topic,
        policy: BufferPolicy,
        result_tx: oneshot::Sender<Result<EventStream<C>>>,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Disconnect {
        done_tx: oneshot::Sender<()>,
    },
}

/// What woke the task up.
enum Wake<C, T> {
    /// `None` once every handle is gone.
    Cmd(Option<ConnCmd<C>>),
    Unsub(UnsubscribeRequest),
    Io(T),
}

enum Flow {
    Continue,
    Subscribed,
    Disconnect(oneshot::Sender<()>),
}

/// A wait on a blocked subscriber was cut short by a cancellation.
enum Interrupt {
    Disconnect(oneshot::Sender<()>),
    /// Every handle is gone.
    Shutdown,
}

impl Interrupt {
    fn into_done_tx(self) -> Option<oneshot::Sender<()>> {
        match self {
            Interrupt::Disconnect(done_tx) => Some(done_tx),
            Interrupt::Shutdown => None,
        }
    }
}

enum Phase {
    Idle,
    Connecting,
    Connected(Box<dyn Connection>),
    Backoff,
    Exit,
}

async fn send_query(
    handlers: &EventHandlers,
    conn: &mut Box<dyn Connection>,
    message: &ClientMessage,
) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    handlers.emit_send(&payload);
    conn.send(payload).await
}

pub(crate) struct ConnectionTask<D: EventDecoder> {
    cmd_rx: mpsc::Receiver<ConnCmd<D::Content>>,
    unsub_rx: mpsc::UnboundedReceiver<UnsubscribeRequest>,
    /// Cloned into every new `EventStream`; also keeps `unsub_rx` open.
    unsub_tx: mpsc::UnboundedSender<UnsubscribeRequest>,
    state_tx: watch::Sender<ConnectionState>,
    connector: Arc<dyn Connector>,
    decoder: D,
    options: StreamingOptions,
    handlers: EventHandlers,
    registry: SubscriberRegistry<D::Content>,
    counters: RetryCounters,
    next_id: u64,
}

impl<D: EventDecoder> ConnectionTask<D> {
    pub fn new(
        cmd_rx: mpsc::Receiver<ConnCmd<D::Content>>,
        state_tx: watch::Sender<ConnectionState>,
        connector: Arc<dyn Connector>,
        decoder: D,
        options: StreamingOptions,
        handlers: EventHandlers,
    ) -> Self {
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();
        Self {
            cmd_rx,
            unsub_rx,
            unsub_tx,
            state_tx,
            connector,
            decoder,
            options,
            handlers,
            registry: SubscriberRegistry::new(),
            counters: RetryCounters::default(),
            next_id: 1,
        }
    }

    pub async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected(conn) => self.connected(conn).await,
                Phase::Backoff => self.backoff().await,
                Phase::Exit => break,
            };
        }
        log::debug!("[feed-link] Connection task exiting");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    // ── States ──────────────────────────────────────────────────────────────

    /// Idle or Terminated: no connection, no pending attempt.
    async fn idle(&mut self) -> Phase {
        let wake: Wake<_, Infallible> = tokio::select! {
            biased;
            cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
            Some(req) = self.unsub_rx.recv() => Wake::Unsub(req),
        };

        match wake {
            Wake::Cmd(None) => self.stop(None),
            Wake::Cmd(Some(cmd)) => match self.handle_command(cmd, None).await {
                Flow::Subscribed => {
                    log::info!("[feed-link] Starting connection maintenance");
                    self.counters = RetryCounters::default();
                    Phase::Connecting
                },
                Flow::Disconnect(done_tx) => self.stop(Some(done_tx)),
                Flow::Continue => Phase::Idle,
            },
            Wake::Unsub(req) => {
                self.handle_unsubscribe(req, None).await;
                Phase::Idle
            },
            Wake::Io(never) => match never {},
        }
    }

    async fn connecting(&mut self) -> Phase {
        if let Err(e) = self.counters.check_budget(&self.options) {
            return self.exhausted(e);
        }
        self.set_state(ConnectionState::Connecting);

        let connector = self.connector.clone();
        let connect = connector.connect();
        tokio::pin!(connect);

        loop {
            let wake = tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                Some(req) = self.unsub_rx.recv() => Wake::Unsub(req),
                result = &mut connect => Wake::Io(result),
            };

            match wake {
                Wake::Io(Ok(conn)) => {
                    self.counters.record_success();
                    log::info!(
                        "[feed-link] Connected (attempt {})",
                        self.counters.total_attempts
                    );
                    return self.enter_connected(conn).await;
                },
                Wake::Io(Err(e)) => {
                    self.counters.record_failure();
                    log::warn!(
                        "[feed-link] Connection attempt {} failed: {}",
                        self.counters.total_attempts,
                        e
                    );
                    self.handlers.emit_error(ConnectionError::retrying(e.to_string()));
                    return Phase::Backoff;
                },
                Wake::Cmd(None) => return self.stop(None),
                Wake::Cmd(Some(cmd)) => {
                    if let Flow::Disconnect(done_tx) = self.handle_command(cmd, None).await {
                        return self.stop(Some(done_tx));
                    }
                },
                Wake::Unsub(req) => self.handle_unsubscribe(req, None).await,
            }
        }
    }

    /// Entry actions of `Connected`: resubscribe batch (or liveness ping),
    /// then `ConnectionUp` to every subscriber.
    async fn enter_connected(&mut self, mut conn: Box<dyn Connection>) -> Phase {
        self.set_state(ConnectionState::Connected);

        let topics = self.registry.topics();
        if topics.is_empty() {
            if let Err(e) = conn.send_ping().await {
                log::warn!("[feed-link] Liveness ping failed: {}", e);
            }
        } else {
            log::info!("[feed-link] Subscribing {} topic(s)", topics.len());
            for topic in &topics {
                if let Err(e) =
                    send_query(&self.handlers, &mut conn, &ClientMessage::subscribe(topic)).await
                {
                    log::warn!("[feed-link] Failed to subscribe {}: {}", topic, e);
                    self.handlers.emit_error(ConnectionError::retrying(format!(
                        "Failed to subscribe {}: {}",
                        topic, e
                    )));
                }
            }
        }

        self.handlers.emit_connect();
        let blocked = self.registry.broadcast(StreamEvent::ConnectionUp).blocked;
        match self.flush_blocked(blocked, Some(&mut conn)).await {
            Some(interrupt) => {
                self.close_connection(conn).await;
                self.stop(interrupt.into_done_tx())
            },
            None => Phase::Connected(conn),
        }
    }

    async fn connected(&mut self, mut conn: Box<dyn Connection>) -> Phase {
        loop {
            let wake = tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                Some(req) = self.unsub_rx.recv() => Wake::Unsub(req),
                frame = conn.next_frame() => Wake::Io(frame),
            };

            match wake {
                Wake::Io(Some(Ok(text))) => {
                    if let Some(interrupt) = self.route_frame(&text, &mut conn).await {
                        self.close_connection(conn).await;
                        return self.stop(interrupt.into_done_tx());
                    }
                },
                Wake::Io(Some(Err(e))) => {
                    log::warn!("[feed-link] Stream read failed: {}", e);
                    return self.connection_lost(DisconnectReason::read_failed(e)).await;
                },
                Wake::Io(None) => {
                    return self.connection_lost(DisconnectReason::stream_ended()).await;
                },
                Wake::Cmd(None) => {
                    self.close_connection(conn).await;
                    return self.stop(None);
                },
                Wake::Cmd(Some(cmd)) => {
                    if let Flow::Disconnect(done_tx) =
                        self.handle_command(cmd, Some(&mut conn)).await
                    {
                        self.close_connection(conn).await;
                        return self.stop(Some(done_tx));
                    }
                },
                Wake::Unsub(req) => self.handle_unsubscribe(req, Some(&mut conn)).await,
            }
        }
    }

    async fn backoff(&mut self) -> Phase {
        if let Err(e) = self.counters.check_budget(&self.options) {
            return self.exhausted(e);
        }

        let delay = self.counters.backoff_delay(&self.options);
        self.set_state(ConnectionState::Backoff);
        log::info!(
            "[feed-link] Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            self.counters.total_attempts + 1
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let wake = tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                Some(req) = self.unsub_rx.recv() => Wake::Unsub(req),
                () = &mut sleep => Wake::Io(()),
            };

            match wake {
                Wake::Io(()) => return Phase::Connecting,
                Wake::Cmd(None) => return self.stop(None),
                Wake::Cmd(Some(cmd)) => {
                    if let Flow::Disconnect(done_tx) = self.handle_command(cmd, None).await {
                        return self.stop(Some(done_tx));
                    }
                },
                Wake::Unsub(req) => self.handle_unsubscribe(req, None).await,
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    /// Exit actions of `Connected`. Returns the `Block` subscribers that
    /// could not take `ConnectionDown` yet.
    fn leave_connected(&mut self, reason: DisconnectReason) -> Vec<BlockedSend<D::Content>> {
        log::info!("[feed-link] Disconnected: {}", reason);
        self.handlers.emit_disconnect(reason);
        self.registry.broadcast(StreamEvent::ConnectionDown).blocked
    }

    async fn connection_lost(&mut self, reason: DisconnectReason) -> Phase {
        let blocked = self.leave_connected(reason);
        match self.flush_blocked(blocked, None).await {
            Some(interrupt) => self.stop(interrupt.into_done_tx()),
            None => Phase::Backoff,
        }
    }

    /// Client-side close. Always followed by `stop`, so full `Block`
    /// subscribers go straight to end of stream without `ConnectionDown`.
    async fn close_connection(&mut self, mut conn: Box<dyn Connection>) {
        let code = self.options.close_code;
        conn.close(code).await;
        let skipped = self.leave_connected(DisconnectReason::client_close(code));
        if !skipped.is_empty() {
            log::debug!(
                "[feed-link] {} full subscriber(s) finish without ConnectionDown",
                skipped.len()
            );
        }
    }

    fn exhausted(&mut self, err: FeedLinkError) -> Phase {
        log::warn!("[feed-link] Giving up: {}", err);
        self.handlers.emit_error(ConnectionError::gave_up(err.to_string()));
        self.terminate();
        Phase::Idle
    }

    /// Cancellation (explicit disconnect or every handle dropped). Never
    /// counted against the retry budget.
    fn stop(&mut self, done_tx: Option<oneshot::Sender<()>>) -> Phase {
        self.terminate();
        match done_tx {
            Some(done_tx) => {
                let _ = done_tx.send(());
                Phase::Idle
            },
            None => Phase::Exit,
        }
    }

    /// Finish every subscriber stream and forget the run's counters.
    fn terminate(&mut self) {
        let finished = self.registry.clear();
        if finished > 0 {
            log::info!("[feed-link] Finished {} subscriber stream(s)", finished);
        }
        self.counters = RetryCounters::default();
        self.set_state(ConnectionState::Terminated);
    }

    // ── Inputs ──────────────────────────────────────────────────────────────

    async fn handle_command(
        &mut self,
        cmd: ConnCmd<D::Content>,
        conn: Option<&mut Box<dyn Connection>>,
    ) -> Flow {
        match cmd {
            ConnCmd::Subscribe {
                topic,
                policy,
                result_tx,
            } => {
                let result = self.register(topic, policy, conn).await;
                let flow = if result.is_ok() {
                    Flow::Subscribed
                } else {
                    Flow::Continue
                };
                // A dropped receiver drops the stream, which unsubscribes it again.
                let _ = result_tx.send(result);
                flow
            },
            ConnCmd::ListSubscriptions { result_tx } => {
                let _ = result_tx.send(self.registry.snapshot());
                Flow::Continue
            },
            ConnCmd::Disconnect { done_tx } => Flow::Disconnect(done_tx),
        }
    }

    async fn register(
        &mut self,
        topic: Topic,
        policy: BufferPolicy,
        conn: Option<&mut Box<dyn Connection>>,
    ) -> Result<EventStream<D::Content>> {
        if let Some(conn) = conn {
            if !self.registry.has_topic(&topic) {
                send_query(&self.handlers, conn, &ClientMessage::subscribe(&topic)).await?;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let (stream, sink) = EventStream::open(id, topic.clone(), policy, self.unsub_tx.clone());
        log::debug!("[feed-link] Registered subscriber {} for {}", id, topic);
        self.registry.insert(id, topic, sink);
        Ok(stream)
    }

    async fn handle_unsubscribe(
        &mut self,
        req: UnsubscribeRequest,
        conn: Option<&mut Box<dyn Connection>>,
    ) {
        let result = match (self.registry.remove(req.id), conn) {
            (Some((topic, true)), Some(conn)) => {
                log::debug!("[feed-link] Last subscriber left {}, unsubscribing", topic);
                let result =
                    send_query(&self.handlers, conn, &ClientMessage::unsubscribe(&topic)).await;
                if let Err(e) = &result {
                    log::warn!("[feed-link] Failed to unsubscribe {}: {}", topic, e);
                }
                result
            },
            _ => Ok(()),
        };

        if let Some(reply) = req.reply {
            let _ = reply.send(result);
        }
    }

    /// Route one inbound frame to the subscribers of its topic. Frames that
    /// fail to decode are skipped.
    async fn route_frame(
        &mut self,
        text: &str,
        conn: &mut Box<dyn Connection>,
    ) -> Option<Interrupt> {
        self.handlers.emit_receive(text);

        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[feed-link] Skipping frame: {}", e);
                return None;
            },
        };
        let topic = match message.topic() {
            Ok(topic) => topic,
            Err(e) => {
                log::warn!("[feed-link] Skipping frame for stream {:?}: {}", message.stream, e);
                return None;
            },
        };
        if !self.registry.has_topic(&topic) {
            log::debug!("[feed-link] No subscriber for {}", topic);
            return None;
        }

        match self.decoder.decode(&message.event, message.payload.as_deref()) {
            Ok(content) => {
                let out = self.registry.deliver(&topic, StreamEvent::ReceivedEvent(content));
                self.flush_blocked(out.blocked, Some(conn)).await
            },
            Err(e) => {
                log::warn!("[feed-link] Skipping '{}' event on {}: {}", message.event, topic, e);
                None
            },
        }
    }

    /// Wait for each full `Block` subscriber to make room, one at a time.
    ///
    /// Commands and unsubscribes keep being served meanwhile. A subscriber
    /// that unsubscribes is skipped; a disconnect or shutdown abandons the
    /// remaining sends and is handed back to the caller.
    async fn flush_blocked(
        &mut self,
        blocked: Vec<BlockedSend<D::Content>>,
        mut conn: Option<&mut Box<dyn Connection>>,
    ) -> Option<Interrupt> {
        for BlockedSend { id, tx, event } in blocked {
            log::debug!("[feed-link] Waiting for subscriber {} to make room", id);
            let send = tx.send(event);
            tokio::pin!(send);

            loop {
                let wake = tokio::select! {
                    biased;
                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    Some(req) = self.unsub_rx.recv() => Wake::Unsub(req),
                    _ = &mut send => Wake::Io(()),
                };

                match wake {
                    Wake::Io(()) => break,
                    Wake::Cmd(None) => return Some(Interrupt::Shutdown),
                    Wake::Cmd(Some(cmd)) => {
                        if let Flow::Disconnect(done_tx) =
                            self.handle_command(cmd, conn.as_deref_mut()).await
                        {
                            return Some(Interrupt::Disconnect(done_tx));
                        }
                    },
                    Wake::Unsub(req) => {
                        let gone = req.id == id;
                        self.handle_unsubscribe(req, conn.as_deref_mut()).await;
                        if gone {
                            break;
                        }
                    },
                }
            }
        }
        None
    }
}
