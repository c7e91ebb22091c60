//! Exponential backoff with jitter for runtime retries.

use rand::Rng;
use std::time::Duration;
use taskbridge_core::retry::{exponential_delay_ms, with_jitter_ms};
use taskbridge_core::RuntimeConfig;

/// Backoff bounds taken from a [`RuntimeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.retry_delay_base_ms, config.retry_delay_max_ms)
    }

    /// `min(max, base * 2^(attempt-1))` for a 1-indexed retry.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        exponential_delay_ms(self.base_ms, self.max_ms, attempt)
    }

    /// Jittered delay for `attempt`, using a sample in `[0, 1)`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay_ms(attempt);
        Duration::from_millis(with_jitter_ms(base, self.max_ms, sample))
    }

    /// Jittered delay for `attempt` drawn from the thread RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::thread_rng().gen();
        self.delay_with_sample(attempt, sample)
    }
}
