//! Exponential retry delays

use std::time::Duration;

/// Initial retry delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Retry delay cap.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Smallest retry delay accepted from configuration.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Doubling backoff: `initial * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        // checked_shl returns None once the shift would overflow
        let exponent = attempt.saturating_sub(1);
        let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(multiplier).min(max_ms))
    }
}
