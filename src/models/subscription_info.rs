//! Subscription metadata exposed to callers.

use serde::{Deserialize, Serialize};

use crate::topic::Topic;

/// Read-only snapshot of a registered subscriber.
///
/// Returned by [`StreamCoordinator::subscriptions()`](crate::StreamCoordinator::subscriptions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Subscriber id assigned when subscribing.
    pub id: u64,
    /// Topic the subscriber listens to.
    pub topic: Topic,
    /// Timestamp (millis since Unix epoch) when the subscriber was registered.
    pub created_at_ms: u64,
}
