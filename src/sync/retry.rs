use std::time::Duration;

/// Explicit backoff policy applied to subscription establishment.
///
/// Delays grow as `base_delay * 2^(attempt - 1)` up to `max_delay`; after
/// `max_attempts` consecutive failures the operation gives up and staleness
/// detection falls to the liveness sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound applied to the computed delay.
    pub max_delay: Duration,
    /// Ceiling on consecutive attempts.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}
