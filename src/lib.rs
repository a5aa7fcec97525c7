//! # feed-link
//!
//! Live-feed streaming client: many subscribers, one auto-reconnecting
//! connection.
//!
//! ## Features
//!
//! - **Shared connection**: every [`Topic`] subscription is multiplexed over a
//!   single streaming connection, opened lazily on the first subscribe
//! - **Deduplicated queries**: one subscribe query per topic however many
//!   subscribers share it, one unsubscribe when the last one leaves
//! - **Auto-reconnect**: exponential backoff bounded by a consecutive-failure
//!   and a total-attempt budget, with the topic set replayed on every new
//!   connection
//! - **Per-subscriber buffering**: [`BufferPolicy`] decides what a slow
//!   subscriber loses, never what the others see
//! - **Pluggable transport and decoding**: [`Connector`] / [`Connection`] and
//!   [`EventDecoder`], with WebSocket and JSON defaults
//!
//! ## Example
//!
//! ```rust,no_run
//! use feed_link::{EventHandlers, StreamCoordinator, StreamEvent, Topic, WsConnector};
//!
//! # async fn example() -> feed_link::Result<()> {
//! let connector = WsConnector::builder()
//!     .base_url("https://social.example")
//!     .access_token("token")
//!     .build()?;
//!
//! let coordinator = StreamCoordinator::builder()
//!     .connector(connector)
//!     .event_handlers(EventHandlers::new().on_disconnect(|r| eprintln!("down: {}", r)))
//!     .build()?;
//!
//! let mut local = coordinator.subscribe(Topic::Local).await?;
//! while let Some(event) = local.next().await {
//!     if let StreamEvent::ReceivedEvent(content) = event {
//!         println!("{:?}", content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod subscription;
pub mod topic;

pub use connection::{Connection, Connector, WsConnector, WsConnectorBuilder};
pub use coordinator::{StreamCoordinator, StreamCoordinatorBuilder};
pub use decoder::{EventDecoder, JsonEventDecoder, StreamContent};
pub use error::{FeedLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    BufferPolicy, ClientMessage, ConnectionState, Overflow, QueryKind, ServerMessage,
    StreamEvent, StreamingOptions, SubscriptionInfo, MAX_BUFFER_CAPACITY,
};
pub use subscription::EventStream;
pub use topic::Topic;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
