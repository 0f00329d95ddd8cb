//! Backoff policy for bulk index writes.

use cellstore_core::config::StoreSettings;
use std::time::Duration;

const MAX_DELAY: Duration = Duration::from_secs(2);

/// Bounded exponential backoff with deterministic jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay: MAX_DELAY.max(base_delay) }
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self::new(
            settings.write_retry_attempts,
            Duration::from_millis(settings.retry_base_delay_ms),
        )
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: usize, jitter_seed: u64) -> Duration {
        let exp = 1u64 << attempt.min(8);
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let without_jitter = base_ms.saturating_mul(exp).min(max_ms);
        let jitter = jitter_seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add((attempt as u64).wrapping_mul(0x9E3779B97F4A7C15));
        let jitter_ms = jitter % (without_jitter / 4).max(1);
        Duration::from_millis(without_jitter.saturating_add(jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&StoreSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(20));
        let first = policy.backoff(0, 7);
        let third = policy.backoff(2, 7);
        assert!(first >= Duration::from_millis(20) && first < Duration::from_millis(26));
        assert!(third >= Duration::from_millis(80));
        assert!(policy.backoff(30, 7) <= MAX_DELAY + MAX_DELAY / 4);
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).backoff(3, 1), Duration::ZERO);
    }
}
