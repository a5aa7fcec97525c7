//! Retry budget bookkeeping and backoff delays for one maintenance run.

use std::time::Duration;

use crate::error::FeedLinkError;
use crate::models::StreamingOptions;

/// Counters of the current maintenance run.
///
/// `consecutive_failures` resets on every successful connect;
/// `total_attempts` only resets when a new run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetryCounters {
    pub consecutive_failures: u32,
    pub total_attempts: u32,
}

impl RetryCounters {
    pub fn record_success(&mut self) {
        self.total_attempts = self.total_attempts.saturating_add(1);
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.total_attempts = self.total_attempts.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Returns the terminal error if another attempt would exceed either limit.
    pub fn check_budget(&self, options: &StreamingOptions) -> Result<(), FeedLinkError> {
        if self.consecutive_failures >= options.max_retries
            || self.total_attempts >= options.max_connection_attempts
        {
            return Err(FeedLinkError::RetriesExhausted {
                consecutive_failures: self.consecutive_failures,
                total_attempts: self.total_attempts,
            });
        }
        Ok(())
    }

    /// `reconnect_delay_ms * 2^consecutive_failures`, capped at `max_reconnect_delay_ms`.
    pub fn backoff_delay(&self, options: &StreamingOptions) -> Duration {
        let factor = 2u64.saturating_pow(self.consecutive_failures);
        let delay_ms = std::cmp::min(
            options.reconnect_delay_ms.saturating_mul(factor),
            options.max_reconnect_delay_ms,
        );
        Duration::from_millis(delay_ms)
    }
}
