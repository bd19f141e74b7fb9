//! Test fixtures: fast configuration, component builders and wait helpers.

#![allow(dead_code)]

use super::mock_executor::MockFeatureExecutor;
use delegation_core::config::{
    CircuitBreakerConfig, DelegationConfig, EventsConfig, PollingConfig, RecoveryConfig,
};
use delegation_core::events::{DelegationEvent, EventKind};
use delegation_core::metrics::{RecordingErrorRecorder, RecordingMetricsSink};
use delegation_core::models::{ComponentSpec, DelegationRecord, FeatureDraft};
use delegation_core::orchestration::DelegationInterface;
use delegation_core::state::StateStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Millisecond-scale timings so lifecycle tests settle quickly
pub fn fast_config() -> DelegationConfig {
    DelegationConfig {
        polling: PollingConfig {
            initial_interval_ms: 5,
            max_interval_ms: 20,
            backoff_multiplier: 2.0,
            max_wait_ms: 2_000,
        },
        recovery: RecoveryConfig {
            max_retry_attempts: 3,
            base_retry_delay_ms: 10,
            jitter_factor: 0.1,
            min_retry_delay_ms: 1,
            individual_success_ratio: 0.5,
            retry_wait_timeout_ms: 2_000,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            reset_delay_ms: 50,
        },
        events: EventsConfig { history_limit: 100 },
        ..DelegationConfig::default()
    }
}

/// Component with explicitly identified features, each depending on the previous one
pub fn chained_component(component_id: &str, feature_ids: &[&str]) -> ComponentSpec {
    let mut spec = ComponentSpec::new(
        component_id,
        format!("{component_id} component"),
        format!("Test component {component_id}"),
    );
    let mut previous: Option<&str> = None;
    for feature_id in feature_ids {
        let mut draft = FeatureDraft::named(format!("{feature_id} feature"), format!("Implements {feature_id}"))
            .with_id(*feature_id);
        if let Some(previous) = previous {
            draft = draft.depends_on(previous);
        }
        spec = spec.with_feature(draft);
        previous = Some(feature_id);
    }
    spec
}

/// Component with independent features
pub fn flat_component(component_id: &str, feature_ids: &[&str]) -> ComponentSpec {
    feature_ids.iter().fold(
        ComponentSpec::new(
            component_id,
            format!("{component_id} component"),
            format!("Test component {component_id}"),
        ),
        |spec, feature_id| {
            spec.with_feature(
                FeatureDraft::named(format!("{feature_id} feature"), format!("Implements {feature_id}"))
                    .with_id(*feature_id),
            )
        },
    )
}

/// Interface wired to recording sinks for inspection
pub struct TestHarness {
    pub interface: DelegationInterface,
    pub executor: MockFeatureExecutor,
    pub metrics: RecordingMetricsSink,
    pub errors: RecordingErrorRecorder,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: DelegationConfig) -> Self {
        let executor = MockFeatureExecutor::new();
        let metrics = RecordingMetricsSink::new();
        let errors = RecordingErrorRecorder::new();
        let interface = DelegationInterface::builder(executor.shared())
            .config(config)
            .metrics_sink(Arc::new(metrics.clone()))
            .error_recorder(Arc::new(errors.clone()))
            .build()
            .expect("test configuration is valid");
        Self {
            interface,
            executor,
            metrics,
            errors,
        }
    }

    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        let executor = MockFeatureExecutor::new();
        let metrics = RecordingMetricsSink::new();
        let errors = RecordingErrorRecorder::new();
        let interface = DelegationInterface::builder(executor.shared())
            .config(fast_config())
            .state_store(store)
            .metrics_sink(Arc::new(metrics.clone()))
            .error_recorder(Arc::new(errors.clone()))
            .build()
            .expect("test configuration is valid");
        Self {
            interface,
            executor,
            metrics,
            errors,
        }
    }

    /// Polls the record until `predicate` holds or the deadline passes
    pub async fn wait_for_record<F>(&self, delegation_id: &str, timeout: Duration, predicate: F) -> DelegationRecord
    where
        F: Fn(&DelegationRecord) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.interface.get_delegation_status(delegation_id).await {
                if predicate(&record) {
                    return record;
                }
                if Instant::now() >= deadline {
                    panic!("record for {delegation_id} never matched, last state {}", record.state);
                }
            } else if Instant::now() >= deadline {
                panic!("record for {delegation_id} never appeared");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until the delegation's history contains `count` events of `kind`
    pub async fn wait_for_events(
        &self,
        delegation_id: &str,
        kind: EventKind,
        count: usize,
        timeout: Duration,
    ) -> Vec<DelegationEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let matching: Vec<DelegationEvent> = self
                .interface
                .notifier()
                .get_event_history(delegation_id)
                .into_iter()
                .filter(|event| event.kind() == kind)
                .collect();
            if matching.len() >= count {
                return matching;
            }
            if Instant::now() >= deadline {
                panic!(
                    "expected {count} {kind} event(s) for {delegation_id}, saw {}",
                    matching.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn event_kinds(&self, delegation_id: &str) -> Vec<EventKind> {
        self.interface
            .notifier()
            .get_event_history(delegation_id)
            .iter()
            .map(DelegationEvent::kind)
            .collect()
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
