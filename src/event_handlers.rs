//! Connection lifecycle hooks for the streaming coordinator.
//!
//! These fire once per connection lifecycle transition, independently of
//! the per-subscriber `ConnectionUp` / `ConnectionDown` events:
//!
//! - [`on_connect`](EventHandlers::on_connect): a streaming connection was established
//! - [`on_disconnect`](EventHandlers::on_disconnect): the active connection closed
//! - [`on_error`](EventHandlers::on_error): a connect attempt failed, or the retry budget ran out
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send):
//!   raw inbound / outbound text, for debugging
//!
//! # Example
//!
//! ```rust
//! use feed_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("streaming"))
//!     .on_disconnect(|reason| println!("disconnected: {}", reason))
//!     .on_error(|err| eprintln!("error (recoverable={}): {}", err.recoverable, err));
//! assert!(handlers.has_any());
//! ```

use std::fmt;
use std::sync::Arc;

/// Why the active streaming connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub message: String,
    /// Close code this side sent. `None` when the server or the network
    /// ended the connection.
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub(crate) fn stream_ended() -> Self {
        Self {
            message: "Stream ended by server".to_string(),
            code: None,
        }
    }

    pub(crate) fn read_failed(err: impl fmt::Display) -> Self {
        Self {
            message: format!("Stream read failed: {}", err),
            code: None,
        }
    }

    pub(crate) fn client_close(code: u16) -> Self {
        Self {
            message: "Client disconnected".to_string(),
            code: Some(code),
        }
    }

    /// Whether the coordinator closed the connection itself (disconnect or
    /// drop) rather than losing it.
    pub fn is_client_initiated(&self) -> bool {
        self.code.is_some()
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} [close {}]", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Passed to `on_error`.
///
/// Recoverable errors are followed by another connect attempt; a
/// non-recoverable one means the coordinator has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    pub message: String,
    pub recoverable: bool,
}

impl ConnectionError {
    pub(crate) fn retrying(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub(crate) fn gave_up(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers run on the coordinator task, so they
/// should return quickly.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when a streaming connection is established.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the active connection closes,
    /// whether the server dropped it or the client disconnected.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection attempt fails or the
    /// retry budget is exhausted.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback receiving every raw inbound text frame before parsing.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a callback receiving every raw outbound query.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}
