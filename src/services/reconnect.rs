use std::time::Duration;

use crate::domain::models::ClientConfig;

/// Exponential reconnect backoff with a ceiling and an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    pub const fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.retry_base_delay_ms,
            config.max_retry_delay_ms,
            config.max_retries,
        )
    }

    /// Delay before the reconnect scheduled after `attempts` prior attempts.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let backoff_ms = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempts))
            .min(self.max_delay_ms);

        Duration::from_millis(backoff_ms)
    }

    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
