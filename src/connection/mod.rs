//! Streaming connection seams.
//!
//! This module contains:
//! - [`Connector`] / [`Connection`]: the transport contract the coordinator
//!   consumes (open, send, read frames, ping, close)
//! - [`websocket`]: the default WebSocket implementation

pub mod websocket;

use async_trait::async_trait;

use crate::error::Result;

pub use websocket::{WsConnector, WsConnectorBuilder};

/// Maximum inbound text frame size (64 MiB).
pub(crate) const MAX_TEXT_FRAME_BYTES: usize = 64 << 20;

/// Opens physical streaming connections on demand.
///
/// The coordinator calls [`connect`](Connector::connect) once per attempt and
/// never holds more than one returned [`Connection`] at a time.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// One open bidirectional channel to the streaming server.
///
/// `next_frame` is raced against commands and cancellation, so it must be
/// cancel safe: dropping the returned future must not lose a frame.
#[async_trait]
pub trait Connection: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound text frame, `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Send a liveness ping.
    async fn send_ping(&mut self) -> Result<()>;

    /// Close gracefully with `code`. Errors are ignored; the connection is
    /// unusable afterwards either way.
    async fn close(&mut self, code: u16);
}
