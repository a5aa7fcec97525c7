//! Data models for feed-link.
//!
//! Wire messages exchanged with the streaming server, events handed to
//! subscribers, and configuration.

pub mod buffer_policy;
pub mod client_message;
pub mod connection_state;
pub mod server_message;
pub mod stream_event;
pub mod streaming_options;
pub mod subscription_info;


pub use buffer_policy::{BufferPolicy, Overflow, MAX_BUFFER_CAPACITY};
pub use client_message::{ClientMessage, QueryKind};
pub use connection_state::ConnectionState;
pub use server_message::ServerMessage;
pub use stream_event::StreamEvent;
pub use streaming_options::StreamingOptions;
pub use subscription_info::SubscriptionInfo;
