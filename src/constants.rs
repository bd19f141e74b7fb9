//! # System Constants
//!
//! Default timings, metric names and storage key layout shared by the
//! mapper, tracker, notifier, interface and recovery handler.

use std::time::Duration;

/// Label carried by Initiated events for the downstream execution subsystem
pub const DOWNSTREAM_TARGET: &str = "phase_three";

/// Default timing parameters
pub mod defaults {
    use super::Duration;

    pub const POLL_INITIAL_INTERVAL: Duration = Duration::from_secs(5);
    pub const POLL_MAX_INTERVAL: Duration = Duration::from_secs(30);
    pub const POLL_BACKOFF_MULTIPLIER: f64 = 1.5;
    pub const MAX_WAIT: Duration = Duration::from_secs(3600);

    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const RETRY_JITTER_FACTOR: f64 = 0.25;
    pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
    pub const INDIVIDUAL_SUCCESS_RATIO: f64 = 0.5;

    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_RESET_DELAY: Duration = Duration::from_secs(60);

    pub const CLEANUP_MAX_AGE_DAYS: u32 = 7;
    pub const EVENT_HISTORY_LIMIT: usize = 500;
}

/// Metric names passed to the metrics sink
pub mod metrics {
    pub const FEATURES_EXTRACTED: &str = "delegation.mapper.features_extracted";
    pub const DEPENDENCIES_ESTABLISHED: &str = "delegation.mapper.dependencies_established";
    pub const VALIDATION_FAILED: &str = "delegation.mapper.validation_failed";

    pub const DELEGATION_REGISTERED: &str = "delegation.registered";
    pub const STATE_CHANGED: &str = "delegation.state_changed";
    pub const FEATURE_STATUS_CHANGED: &str = "delegation.feature_status_changed";
    pub const DELEGATIONS_CLEANED: &str = "delegation.cleaned_up";

    pub const EVENT_EMITTED: &str = "delegation.event_emitted";

    pub const DELEGATION_STARTED: &str = "delegation.interface.started";
    pub const DELEGATION_FINISHED: &str = "delegation.interface.finished";
    pub const DELEGATION_CANCELLED: &str = "delegation.interface.cancelled";

    pub const RECOVERY_ATTEMPTED: &str = "delegation.recovery.attempted";
    pub const RECOVERY_SUCCEEDED: &str = "delegation.recovery.succeeded";
    pub const RECOVERY_FAILED: &str = "delegation.recovery.failed";
    pub const RECOVERY_SKIPPED: &str = "delegation.recovery.circuit_open";
    pub const MAX_RETRIES_REACHED: &str = "delegation.recovery.max_retries_reached";
    pub const CIRCUIT_OPENED: &str = "delegation.circuit_breaker.opened";
    pub const CIRCUIT_CLOSED: &str = "delegation.circuit_breaker.closed";
}

/// Key layout in the durable state store
pub mod keys {
    pub const DELEGATION_PREFIX: &str = "delegation:";
    pub const STATUS_SUFFIX: &str = ":status";

    pub fn delegation_status(delegation_id: &str) -> String {
        format!("delegation:{delegation_id}:status")
    }

    pub fn delegation_latest_event(delegation_id: &str) -> String {
        format!("delegation:{delegation_id}:latest_event")
    }

    pub fn delegation_start_time(delegation_id: &str) -> String {
        format!("delegation:{delegation_id}:start_time")
    }

    pub fn delegation_retry(delegation_id: &str, retry_count: u32) -> String {
        format!("delegation:{delegation_id}:retry:{retry_count}")
    }

    /// Prefix shared by every key stored for one delegation
    pub fn delegation_keys(delegation_id: &str) -> String {
        format!("delegation:{delegation_id}:")
    }

    pub fn component_delegation_status(component_id: &str) -> String {
        format!("component:{component_id}:delegation:status")
    }

    pub fn component_features(component_id: &str) -> String {
        format!("component:{component_id}:features")
    }

    pub fn component_definition(component_id: &str) -> String {
        format!("component:{component_id}:definition")
    }

    pub fn feature_definition(feature_id: &str) -> String {
        format!("feature:{feature_id}:definition")
    }

    pub fn feature_implementation(feature_id: &str) -> String {
        format!("feature:{feature_id}:implementation")
    }

    /// Extracts the delegation id from a `delegation:{id}:status` key
    pub fn parse_delegation_status_key(key: &str) -> Option<&str> {
        key.strip_prefix(DELEGATION_PREFIX)?
            .strip_suffix(STATUS_SUFFIX)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn test_parse_delegation_status_key() {
        let key = keys::delegation_status("delegation_c1_0a1b2c3d");
        assert_eq!(
            keys::parse_delegation_status_key(&key),
            Some("delegation_c1_0a1b2c3d")
        );
        assert_eq!(
            keys::parse_delegation_status_key("delegation:abc:latest_event"),
            None
        );
        assert_eq!(keys::parse_delegation_status_key("delegation::status"), None);
    }
}
