//! Retry delay and poll interval schedules.

use crate::config::{PollingConfig, RecoveryConfig};
use std::time::Duration;

/// Jittered exponential delay before retry number `retry_count` (1-based).
pub fn retry_delay(config: &RecoveryConfig, retry_count: u32) -> Duration {
    retry_delay_with_sample(config, retry_count, fastrand::f64())
}

/// [`retry_delay`] with the random sample supplied by the caller.
/// `sample` in `[0, 1)` maps linearly onto `[-jitter, +jitter)`.
pub fn retry_delay_with_sample(config: &RecoveryConfig, retry_count: u32, sample: f64) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(30) as i32;
    let base = config.base_retry_delay().as_secs_f64() * 2f64.powi(exponent);
    let jitter = config.jitter_factor * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
    let delay = (base * (1.0 + jitter)).max(config.min_retry_delay().as_secs_f64());
    Duration::from_secs_f64(delay)
}

/// Next poll interval: the current one grown by the multiplier, capped at the maximum.
pub fn next_poll_interval(config: &PollingConfig, current: Duration) -> Duration {
    current
        .mul_f64(config.backoff_multiplier)
        .min(config.max_interval())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovery() -> RecoveryConfig {
        RecoveryConfig {
            base_retry_delay_ms: 5_000,
            jitter_factor: 0.25,
            min_retry_delay_ms: 1_000,
            ..RecoveryConfig::default()
        }
    }

    #[test]
    fn test_retry_delay_doubles_per_attempt() {
        let config = recovery();
        assert_eq!(retry_delay_with_sample(&config, 1, 0.5), Duration::from_secs(5));
        assert_eq!(retry_delay_with_sample(&config, 2, 0.5), Duration::from_secs(10));
        assert_eq!(retry_delay_with_sample(&config, 3, 0.5), Duration::from_secs(20));
    }

    #[test]
    fn test_retry_delay_jitter_bounds() {
        let config = recovery();
        assert_eq!(retry_delay_with_sample(&config, 1, 0.0), Duration::from_millis(3_750));
        assert_eq!(retry_delay_with_sample(&config, 1, 1.0), Duration::from_millis(6_250));
    }

    #[test]
    fn test_retry_delay_respects_minimum() {
        let config = RecoveryConfig {
            base_retry_delay_ms: 100,
            min_retry_delay_ms: 1_000,
            ..recovery()
        };
        assert_eq!(retry_delay_with_sample(&config, 1, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_poll_interval_growth_is_capped() {
        let config = PollingConfig {
            initial_interval_ms: 5_000,
            max_interval_ms: 30_000,
            backoff_multiplier: 1.5,
            ..PollingConfig::default()
        };
        let mut interval = config.initial_interval();
        let mut seen = Vec::new();
        for _ in 0..6 {
            interval = next_poll_interval(&config, interval);
            seen.push(interval.as_millis());
        }
        assert_eq!(seen, vec![7_500, 11_250, 16_875, 25_312, 30_000, 30_000]);
    }
}
