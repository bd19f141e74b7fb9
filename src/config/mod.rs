//! # Delegation Configuration
//!
//! Typed configuration for the delegation core with serde defaults for every
//! field, so partial files and environment overrides merge over the built-in
//! values.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use delegation_core::config::ConfigLoader;
//!
//! # fn example() -> delegation_core::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! assert!(config.polling.backoff_multiplier >= 1.0);
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use crate::constants::defaults;
use crate::error::{DelegationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    pub polling: PollingConfig,
    pub recovery: RecoveryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cleanup: CleanupConfig,
    pub events: EventsConfig,
}

/// Dispatch-and-poll loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub max_wait_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: defaults::POLL_INITIAL_INTERVAL.as_millis() as u64,
            max_interval_ms: defaults::POLL_MAX_INTERVAL.as_millis() as u64,
            backoff_multiplier: defaults::POLL_BACKOFF_MULTIPLIER,
            max_wait_ms: defaults::MAX_WAIT.as_millis() as u64,
        }
    }
}

impl PollingConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Recovery handler retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_retry_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub jitter_factor: f64,
    pub min_retry_delay_ms: u64,
    /// Fraction of individually retried features that must succeed for the
    /// attempt to count as a circuit breaker success
    pub individual_success_ratio: f64,
    pub retry_wait_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_retry_delay_ms: defaults::BASE_RETRY_DELAY.as_millis() as u64,
            jitter_factor: defaults::RETRY_JITTER_FACTOR,
            min_retry_delay_ms: defaults::MIN_RETRY_DELAY.as_millis() as u64,
            individual_success_ratio: defaults::INDIVIDUAL_SUCCESS_RATIO,
            retry_wait_timeout_ms: defaults::MAX_WAIT.as_millis() as u64,
        }
    }
}

impl RecoveryConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn min_retry_delay(&self) -> Duration {
        Duration::from_millis(self.min_retry_delay_ms)
    }

    pub fn retry_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_wait_timeout_ms)
    }
}

/// Shared circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_delay_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::CIRCUIT_FAILURE_THRESHOLD,
            reset_delay_ms: defaults::CIRCUIT_RESET_DELAY.as_millis() as u64,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub max_age_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_days: defaults::CLEANUP_MAX_AGE_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum events kept in memory per delegation
    pub history_limit: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_limit: defaults::EVENT_HISTORY_LIMIT,
        }
    }
}

impl DelegationConfig {
    /// Defaults with environment overrides applied, without touching the filesystem
    pub fn from_env() -> Result<Self> {
        ConfigLoader::new().without_file().load()
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.initial_interval_ms == 0 || self.polling.max_interval_ms == 0 {
            return Err(DelegationError::Configuration(
                "polling intervals must be greater than zero".to_string(),
            ));
        }
        if self.polling.max_interval_ms < self.polling.initial_interval_ms {
            return Err(DelegationError::Configuration(format!(
                "polling.max_interval_ms ({}) is below polling.initial_interval_ms ({})",
                self.polling.max_interval_ms, self.polling.initial_interval_ms
            )));
        }
        if !(self.polling.backoff_multiplier >= 1.0) {
            return Err(DelegationError::Configuration(format!(
                "polling.backoff_multiplier must be >= 1.0, got {}",
                self.polling.backoff_multiplier
            )));
        }
        if self.polling.max_wait_ms == 0 {
            return Err(DelegationError::Configuration(
                "polling.max_wait_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.recovery.jitter_factor) {
            return Err(DelegationError::Configuration(format!(
                "recovery.jitter_factor must be in [0, 1), got {}",
                self.recovery.jitter_factor
            )));
        }
        let ratio = self.recovery.individual_success_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(DelegationError::Configuration(format!(
                "recovery.individual_success_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(DelegationError::Configuration(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
