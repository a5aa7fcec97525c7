//! Scripted in-memory streaming server for integration tests.
//!
//! [`MockConnector`] plays back a queue of connect [`Outcome`]s (falling back
//! to a default once the script runs out) and records everything the
//! coordinator sends on each accepted [`Session`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feed_link::{
    ClientMessage, Connection, Connector, EventStream, FeedLinkError, QueryKind, StreamContent,
    StreamEvent, Topic,
};
use tokio::sync::{mpsc, Semaphore};

/// Generous bound for any single await in a test. Time is paused, so this
/// only fires when something is genuinely stuck.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Refuse,
    Accept,
    /// Accept, then end the stream right away.
    AcceptThenDrop,
}

enum ServerFrame {
    Text(String),
    Drop,
}

/// Server side of one accepted connection.
pub struct Session {
    sent: Mutex<Vec<ClientMessage>>,
    pings: AtomicUsize,
    close_code: Mutex<Option<u16>>,
    frames_tx: mpsc::UnboundedSender<ServerFrame>,
}

impl Session {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: QueryKind) -> Vec<Topic> {
        self.sent()
            .into_iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.topic().unwrap())
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn close_code(&self) -> Option<u16> {
        *self.close_code.lock().unwrap()
    }

    /// Push one raw text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.frames_tx.send(ServerFrame::Text(text.into()));
    }

    /// Push a well-formed event frame.
    pub fn push_event(&self, stream: &[&str], event: &str, payload: Option<&str>) {
        let mut frame = serde_json::json!({ "stream": stream, "event": event });
        if let Some(payload) = payload {
            frame["payload"] = serde_json::Value::String(payload.to_string());
        }
        self.push(frame.to_string());
    }

    /// End the stream from the server side.
    pub fn drop_connection(&self) {
        let _ = self.frames_tx.send(ServerFrame::Drop);
    }
}

struct Inner {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fail_sends: AtomicBool,
    attempts: AtomicUsize,
    sessions: Mutex<Vec<Arc<Session>>>,
}

#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    /// Every attempt ends with `fallback` unless scripted otherwise.
    pub fn new(fallback: Outcome) -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                gate: Mutex::new(None),
                fail_sends: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Outcome::Accept)
    }

    pub fn script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.inner.script.lock().unwrap().extend(outcomes);
        self
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        *self.inner.fallback.lock().unwrap() = outcome;
    }

    /// Hold every connect attempt until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        *self.inner.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.inner.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    /// Make every `send` on every session fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Connect attempts that reached an outcome.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.sessions.lock().unwrap().clone()
    }

    pub fn session(&self, index: usize) -> Arc<Session> {
        self.sessions()[index].clone()
    }

    pub async fn wait_for_session(&self, index: usize) -> Arc<Session> {
        wait_until(|| self.sessions().len() > index).await;
        self.session(index)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> feed_link::Result<Box<dyn Connection>> {
        let gate = self.inner.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            // Closing the semaphore is the release signal.
            let _ = gate.acquire().await;
        }

        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.inner.fallback.lock().unwrap());

        if outcome == Outcome::Refuse {
            return Err(FeedLinkError::ConnectionError("connection refused".to_string()));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            sent: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            close_code: Mutex::new(None),
            frames_tx,
        });
        if outcome == Outcome::AcceptThenDrop {
            session.drop_connection();
        }
        self.inner.sessions.lock().unwrap().push(session.clone());

        Ok(Box::new(MockConnection {
            session,
            frames_rx,
            inner: self.inner.clone(),
        }))
    }
}

struct MockConnection {
    session: Arc<Session>,
    frames_rx: mpsc::UnboundedReceiver<ServerFrame>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> feed_link::Result<()> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(FeedLinkError::SendError("broken pipe".to_string()));
        }
        let message: ClientMessage = serde_json::from_str(&text)?;
        self.session.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<feed_link::Result<String>> {
        match self.frames_rx.recv().await {
            Some(ServerFrame::Text(text)) => Some(Ok(text)),
            Some(ServerFrame::Drop) | None => None,
        }
    }

    async fn send_ping(&mut self) -> feed_link::Result<()> {
        self.session.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self, code: u16) {
        *self.session.close_code.lock().unwrap() = Some(code);
    }
}

/// Poll `condition` until it holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
}

/// Await `future`, failing the test if it takes longer than [`STEP_TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .expect("step timed out")
}

pub async fn next_event(stream: &mut EventStream) -> Option<StreamEvent<StreamContent>> {
    within(stream.next()).await
}

/// Wait for the next received event, skipping connection signals.
pub async fn next_content(stream: &mut EventStream) -> StreamContent {
    loop {
        match next_event(stream).await {
            Some(StreamEvent::ReceivedEvent(content)) => return content,
            Some(_) => continue,
            None => panic!("stream finished while waiting for content"),
        }
    }
}

/// Drain a stream to its end, returning everything it yielded.
pub async fn collect_until_finished(stream: &mut EventStream) -> Vec<StreamEvent<StreamContent>> {
    let mut events = Vec::new();
    while let Some(event) = next_event(stream).await {
        events.push(event);
    }
    events
}
