use std::time::Duration;

use crate::config::DeliveryConfig;

/// Retry schedule for failed delivery attempts: `base * 2^attempt`, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before redelivering an intent that has failed `attempt` times.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32);
        let factor = 2u64.saturating_pow(exponent);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Whether an intent with this attempt count has exhausted its retries.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(60));

        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(5));

        assert_eq!(policy.delay_for(20), Duration::from_secs(5));
        // Large exponents must not overflow
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
