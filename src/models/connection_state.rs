use serde::{Deserialize, Serialize};

/// Observable state of the coordinator's connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No maintenance run active; nothing has been requested yet.
    #[default]
    Idle,
    /// Opening a new connection.
    Connecting,
    /// A connection is live and frames are being routed.
    Connected,
    /// Waiting before the next connection attempt.
    Backoff,
    /// The last maintenance run ended (budget exhausted or disconnected).
    /// A new subscription starts a fresh run.
    Terminated,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
