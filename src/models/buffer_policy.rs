use serde::{Deserialize, Serialize};

/// Largest buffer a subscriber channel is ever given. Larger requested
/// capacities, including deserialized ones, are clamped to it.
pub const MAX_BUFFER_CAPACITY: usize = 1 << 20;

/// What a bounded subscriber buffer does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Discard the oldest buffered event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
    /// Suspend the coordinator until the consumer makes room.
    ///
    /// A slow consumer with this policy stalls frame routing for every other
    /// subscriber while its buffer stays full. Commands and unsubscribes are
    /// still served, so `close()` and `disconnect()` always complete.
    Block,
}

/// Buffering policy of a single subscriber's event channel.
///
/// # Example
///
/// ```rust
/// use feed_link::{BufferPolicy, Overflow};
///
/// let policy = BufferPolicy::bounded(256, Overflow::DropOldest);
/// assert_eq!(policy.capacity(), Some(256));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BufferPolicy {
    /// No limit; delivery never blocks or drops.
    #[default]
    Unbounded,
    /// At most `capacity` buffered events, `overflow` decides what happens next.
    Bounded {
        capacity: usize,
        #[serde(default)]
        overflow: Overflow,
    },
}

impl BufferPolicy {
    /// Bounded policy. Capacity is clamped to `1..=MAX_BUFFER_CAPACITY`.
    pub fn bounded(capacity: usize, overflow: Overflow) -> Self {
        BufferPolicy::Bounded {
            capacity: capacity.clamp(1, MAX_BUFFER_CAPACITY),
            overflow,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match self {
            BufferPolicy::Unbounded => None,
            BufferPolicy::Bounded { capacity, .. } => Some(*capacity),
        }
    }
}
