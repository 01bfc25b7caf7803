//! Retry policy for the platform connect loop

use std::time::Duration;

/// Fixed-interval retry with an optional attempt limit
///
/// The default retries forever every five seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(5000))
    }
}

impl RetryPolicy {
    /// Unbounded retries at a fixed interval
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Stop after `max` attempts
    pub const fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Sleep between attempts
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Attempt limit, `None` when unbounded
    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}
