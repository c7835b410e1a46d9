//! Retry delay schedule and retry accounting.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on any single retry delay.
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Automatic retries allowed after the initial attempt fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff: `min(base * 2^attempt, ceiling)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for attempt 0
    pub base: Duration,
    /// Maximum delay
    pub ceiling: Duration,
    /// Retries before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            ceiling: DEFAULT_BACKOFF_CEILING,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before retry number `attempt` (0-based).
    ///
    /// Saturates instead of overflowing, so any `attempt` is valid.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let scaled = 1u64
            .checked_shl(attempt)
            .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor));
        Duration::from_millis(scaled).min(self.ceiling)
    }
}

/// Delay before retry `attempt` under the default policy.
pub fn next_delay(attempt: u32) -> Duration {
    BackoffPolicy::default().delay(attempt)
}

/// Consecutive failed acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt_count: u32,
    max_attempts: u32,
}

impl RetryState {
    /// Fresh retry state allowing `max_attempts` retries.
    pub fn new(max_attempts: u32) -> Self {
        Self { attempt_count: 0, max_attempts }
    }

    /// Retries performed so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another automatic retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Count a retry.
    pub fn record_retry(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Back to zero.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}
