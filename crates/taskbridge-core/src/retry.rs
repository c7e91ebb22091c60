//! Retry policy and exponential backoff math.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound of the random jitter, as a fraction of the base delay.
pub const JITTER_FRACTION: f64 = 0.3;

/// How many times a unit of work may run and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Cap on any single delay (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-indexed), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(exponential_delay_ms(
            self.base_delay_ms,
            self.max_delay_ms,
            attempt,
        ))
    }
}

/// `min(max, base * 2^(attempt-1))` for a 1-indexed attempt, saturating.
pub fn exponential_delay_ms(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Add jitter to `delay_ms`. `sample` is a uniform value in `[0, 1)`.
///
/// The result lies in `[delay, delay * 1.3)` and never exceeds `max_ms`.
pub fn with_jitter_ms(delay_ms: u64, max_ms: u64, sample: f64) -> u64 {
    let sample = sample.clamp(0.0, 1.0);
    let jitter = (delay_ms as f64 * JITTER_FRACTION * sample) as u64;
    delay_ms.saturating_add(jitter).min(max_ms.max(delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        assert_eq!(exponential_delay_ms(1000, 30_000, 1), 1000);
        assert_eq!(exponential_delay_ms(1000, 30_000, 2), 2000);
        assert_eq!(exponential_delay_ms(1000, 30_000, 3), 4000);
        assert_eq!(exponential_delay_ms(1000, 30_000, 6), 30_000);
        assert_eq!(exponential_delay_ms(1000, 30_000, 200), 30_000);
        // attempt 0 is treated like the first retry
        assert_eq!(exponential_delay_ms(1000, 30_000, 0), 1000);
    }

    #[test]
    fn test_jitter_bounds() {
        for attempt in 1..=8 {
            let d = exponential_delay_ms(100, 5_000, attempt);
            for sample in [0.0, 0.25, 0.5, 0.999] {
                let j = with_jitter_ms(d, 5_000, sample);
                assert!(j >= d, "jittered {j} below base {d}");
                assert!(j as f64 <= d as f64 * 1.3);
                assert!(j <= 5_000);
            }
        }
    }

    #[test]
    fn test_policy_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::single_attempt().max_attempts, 1);
    }
}
