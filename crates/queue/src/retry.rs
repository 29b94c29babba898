//! Retry configuration with exponential backoff.

use std::time::Duration;

/// Retry policy for failed dispatch attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of execution attempts.
    pub max_attempts: u32,
    /// Base delay; the actual delay is `base_delay * 2^attempt`.
    pub base_delay: Duration,
    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff delay after the given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(16);
        let delay = self.base_delay.saturating_mul(1_u32 << shift);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` executions.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
