use serde::{Deserialize, Serialize};

use super::buffer_policy::BufferPolicy;

/// Connection-level options for the streaming coordinator.
///
/// These options control:
/// - Retry limits of the connection maintenance loop
/// - Reconnection backoff timing
/// - The default buffering policy of new subscriptions
///
/// # Example
///
/// ```rust
/// use feed_link::{BufferPolicy, Overflow, StreamingOptions};
///
/// let options = StreamingOptions::default()
///     .with_max_retries(3)
///     .with_max_connection_attempts(20)
///     .with_reconnect_delay_ms(250)
///     .with_buffer_policy(BufferPolicy::bounded(1024, Overflow::DropOldest));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingOptions {
    /// Consecutive failed connection attempts tolerated before giving up.
    /// Reset by every successful connect.
    /// Default: 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Total connection attempts (successful or not) allowed in one
    /// maintenance run.
    /// Default: 10
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,

    /// Base delay in milliseconds for exponential backoff
    /// (`reconnect_delay_ms * 2^consecutive_failures`).
    /// Default: 500ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound of the backoff delay.
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Buffering policy used by [`subscribe`](crate::StreamCoordinator::subscribe).
    /// Default: unbounded
    #[serde(default)]
    pub buffer_policy: BufferPolicy,

    /// Close code sent when the coordinator disconnects gracefully.
    /// Default: 1000 (normal closure)
    #[serde(default = "default_close_code")]
    pub close_code: u16,
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_connection_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_close_code() -> u16 {
    1000
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_connection_attempts: default_max_connection_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            buffer_policy: BufferPolicy::default(),
            close_code: default_close_code(),
        }
    }
}

impl StreamingOptions {
    /// Create new options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of consecutive failures tolerated
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the total number of connection attempts per maintenance run
    pub fn with_max_connection_attempts(mut self, max_attempts: u32) -> Self {
        self.max_connection_attempts = max_attempts;
        self
    }

    /// Set the backoff base delay (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the backoff cap (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the default buffering policy for new subscriptions
    pub fn with_buffer_policy(mut self, policy: BufferPolicy) -> Self {
        self.buffer_policy = policy;
        self
    }

    /// Set the close code sent on graceful disconnect
    pub fn with_close_code(mut self, code: u16) -> Self {
        self.close_code = code;
        self
    }
}
