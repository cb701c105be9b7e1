use crate::config::QueueConfig;
use rand::Rng;
use std::time::Duration;

/// Retry ceiling and bounded exponential backoff of the upload queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an item is parked
    pub retry_ceiling: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            retry_ceiling: config.retry_ceiling.max(1),
            base_delay: Duration::from_secs(config.backoff_base_secs),
            max_delay: Duration::from_secs(config.backoff_max_secs),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Backoff with jitter in `[delay/2, delay]` so retries of many items spread out
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt).as_millis() as u64;
        if delay == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::rng().random_range(delay / 2..=delay);
        Duration::from_millis(jittered)
    }

    pub fn has_reached_ceiling(&self, attempts: u32) -> bool {
        attempts >= self.retry_ceiling
    }
}
