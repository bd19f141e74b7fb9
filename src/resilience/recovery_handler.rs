//! # Recovery Handler
//!
//! Reacts to Failed events. The error classification selects a strategy
//! from the strategy table, the shared circuit breaker decides whether any
//! recovery may run, and a per-delegation retry budget forces the breaker
//! strategy once exhausted.
//!
//! Retries run in their own tasks after a jittered exponential delay.
//! Whole-component retries run under a derived delegation id
//! (`{id}_retry_{n}`) whose outcome is copied back onto the original; Failed
//! events of derived delegations are never recovered themselves.

use crate::config::RecoveryConfig;
use crate::constants::{keys, metrics as metric_names};
use crate::events::{
    DelegationEvent, EventContext, EventHandler, EventKind, EventPayload, FailureReport,
    RetryNotice, SubscriptionId,
};
use crate::logging::{log_error, log_recovery_operation};
use crate::metrics::{emit_error, emit_metric};
use crate::models::{ComponentSpec, DelegationRecord, FeatureSpec, StateUpdate};
use crate::orchestration::delegation_interface::DelegationInterface;
use crate::orchestration::error_classifier::{classify_error_message, DelegationErrorType};
use crate::orchestration::types::{CleanupResult, DelegateOptions, ResultStatus};
use crate::resilience::backoff::retry_delay;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus};
use crate::resilience::fallback::generate_fallback_implementation;
use crate::resilience::strategy::{RecoveryStrategy, StrategyTable};
use crate::state::StateStoreExt;
use crate::state_machine::DelegationState;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SOURCE: &str = "recovery_handler";

/// Snapshot returned by [`RecoveryHandler::get_recovery_statistics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub total_retries: u64,
    pub active_recoveries: usize,
    pub circuit_breaker: CircuitBreakerStatus,
    pub retry_counts: HashMap<String, u32>,
}

/// The failure that triggered a recovery
#[derive(Debug, Clone)]
struct FailureContext {
    context: EventContext,
    record: DelegationRecord,
    error_type: DelegationErrorType,
    error_message: String,
    failed_features: Vec<String>,
}

pub struct RecoveryHandler {
    interface: DelegationInterface,
    breaker: Arc<CircuitBreaker>,
    strategies: StrategyTable,
    config: RecoveryConfig,
    retry_counts: DashMap<String, u32>,
    total_retries: AtomicU64,
    /// `{delegation_id}_retry_{n}` -> strategy of the scheduled attempt
    active_recoveries: DashMap<String, RecoveryStrategy>,
    /// derived retry delegation id -> original delegation id
    derived_delegations: DashMap<String, String>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl std::fmt::Debug for RecoveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryHandler")
            .field("breaker", &self.breaker)
            .field("active_recoveries", &self.active_recoveries.len())
            .finish()
    }
}

/// Subscriber registered with the notifier. Holds the handler weakly so the
/// notifier never keeps it alive.
struct FailedEventListener {
    handler: Weak<RecoveryHandler>,
}

#[async_trait]
impl EventHandler for FailedEventListener {
    async fn handle(&self, event: &DelegationEvent) -> anyhow::Result<()> {
        match self.handler.upgrade() {
            Some(handler) => handler.handle_failure(event).await,
            None => Ok(()),
        }
    }
}

impl RecoveryHandler {
    /// Handler with its own breaker built from the interface configuration
    pub fn new(interface: &DelegationInterface) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "delegation_recovery",
            interface.config().circuit_breaker.clone(),
            interface.metrics().clone(),
        ));
        Self {
            config: interface.config().recovery.clone(),
            interface: interface.clone(),
            breaker,
            strategies: StrategyTable::new(),
            retry_counts: DashMap::new(),
            total_retries: AtomicU64::new(0),
            active_recoveries: DashMap::new(),
            derived_delegations: DashMap::new(),
            subscription: Mutex::new(None),
        }
    }

    /// Shares an existing breaker instead of creating one
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replaces the strategy for one error type
    pub fn with_strategy(mut self, error_type: DelegationErrorType, strategy: RecoveryStrategy) -> Self {
        self.strategies.set(error_type, strategy);
        self
    }

    /// Subscribes to Failed events and returns the shared handler
    pub fn attach(self) -> Arc<Self> {
        let handler = Arc::new(self);
        let listener = Arc::new(FailedEventListener {
            handler: Arc::downgrade(&handler),
        });
        let id = handler
            .interface
            .notifier()
            .subscribe(EventKind::Failed, listener);
        *handler.subscription.lock() = Some(id);
        info!("🛡️ Recovery handler attached to failure events");
        handler
    }

    /// Stops reacting to Failed events
    pub fn detach(&self) -> bool {
        match self.subscription.lock().take() {
            Some(id) => self.interface.notifier().unsubscribe(EventKind::Failed, id),
            None => false,
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn strategy_for(&self, error_type: DelegationErrorType) -> RecoveryStrategy {
        self.strategies.strategy_for(error_type)
    }

    pub fn get_circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.breaker.status()
    }

    pub fn manual_reset_circuit_breaker(&self) -> CircuitBreakerStatus {
        self.breaker.manual_reset();
        self.breaker.status()
    }

    pub fn get_recovery_statistics(&self) -> RecoveryStatistics {
        RecoveryStatistics {
            total_retries: self.total_retries.load(Ordering::Acquire),
            active_recoveries: self.active_recoveries.len(),
            circuit_breaker: self.breaker.status(),
            retry_counts: self
                .retry_counts
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }

    pub fn retry_count(&self, delegation_id: &str) -> u32 {
        self.retry_counts
            .get(delegation_id)
            .map_or(0, |count| *count.value())
    }

    /// Runs the interface cleanup and drops the retry bookkeeping of every
    /// removed delegation
    pub async fn cleanup_completed_delegations(&self, max_age_days: Option<u32>) -> CleanupResult {
        let result = self.interface.cleanup_completed_delegations(max_age_days).await;
        self.forget_delegations(&result.cleaned_up_delegations);
        result
    }

    /// Drops retry counts and derived-id links for delegations that no longer exist
    pub fn forget_delegations(&self, delegation_ids: &[String]) {
        if delegation_ids.is_empty() {
            return;
        }
        for delegation_id in delegation_ids {
            self.retry_counts.remove(delegation_id);
        }
        self.derived_delegations.retain(|derived, original| {
            !delegation_ids.contains(derived) && !delegation_ids.contains(original)
        });
        debug!(count = delegation_ids.len(), "Dropped recovery bookkeeping for cleaned delegations");
    }

    /// Entry point for a Failed event
    #[instrument(skip(self, event), fields(delegation_id = %event.delegation_id))]
    pub async fn handle_failure(self: &Arc<Self>, event: &DelegationEvent) -> anyhow::Result<()> {
        let EventPayload::Failed {
            error_type,
            error_message,
            failed_features,
            ..
        } = &event.payload
        else {
            return Ok(());
        };
        let delegation_id = event.delegation_id.as_str();

        if let Some(original) = self.derived_delegations.get(delegation_id) {
            debug!(original = %original.value(), "Failure of a retry delegation is handled by its original");
            return Ok(());
        }

        let Some(record) = self.interface.get_delegation_status(delegation_id).await else {
            warn!("Failed event for unknown delegation");
            return Ok(());
        };
        if matches!(record.state, DelegationState::Completed | DelegationState::Cancelled) {
            debug!(state = %record.state, "Delegation already settled, no recovery");
            return Ok(());
        }

        if !self.breaker.try_acquire() {
            emit_metric(
                self.interface.metrics().as_ref(),
                metric_names::RECOVERY_SKIPPED,
                1.0,
                json!({ "delegation_id": delegation_id, "error_type": error_type }),
            );
            warn!(breaker = %self.breaker.state(), "Circuit breaker open, skipping recovery");
            return Ok(());
        }

        // An exhausted budget overrides whichever strategy the error selects
        let mut strategy = self.strategy_for(*error_type);
        let retries = self.retry_count(delegation_id);
        if retries >= self.config.max_retry_attempts && strategy != RecoveryStrategy::CircuitBreaker {
            emit_metric(
                self.interface.metrics().as_ref(),
                metric_names::MAX_RETRIES_REACHED,
                f64::from(retries),
                json!({ "delegation_id": delegation_id, "max_retry_attempts": self.config.max_retry_attempts }),
            );
            warn!(retries = retries, "Retry budget exhausted, switching to circuit breaker strategy");
            strategy = RecoveryStrategy::CircuitBreaker;
        }

        emit_metric(
            self.interface.metrics().as_ref(),
            metric_names::RECOVERY_ATTEMPTED,
            1.0,
            json!({
                "delegation_id": delegation_id,
                "error_type": error_type,
                "strategy": strategy.as_str(),
            }),
        );
        log_recovery_operation(delegation_id, strategy.as_str(), retries, "selected", Some(error_message.as_str()));

        let failure = FailureContext {
            context: event.context(),
            error_type: *error_type,
            error_message: error_message.clone(),
            failed_features: if failed_features.is_empty() {
                record.non_completed_features()
            } else {
                failed_features.clone()
            },
            record,
        };

        let dispatched = match strategy {
            RecoveryStrategy::RetryAll => self.schedule_retry_all(failure).await,
            RecoveryStrategy::RetryIndividual => self.schedule_retry_individual(failure).await,
            RecoveryStrategy::PartialCompletion => self.accept_partial_completion(failure).await,
            RecoveryStrategy::Fallback => self.use_fallback_implementations(failure).await,
            RecoveryStrategy::CircuitBreaker => {
                self.breaker.record_outcome(true);
                log_recovery_operation(delegation_id, strategy.as_str(), retries, "not_recovered", None);
                Ok(())
            }
        };
        // A failed dispatch still has to release the breaker permit
        if let Err(e) = &dispatched {
            self.record_recovery_error(delegation_id, strategy, &e.to_string()).await;
            self.record_recovery_outcome(delegation_id, strategy, false);
        }
        dispatched
    }

    fn next_retry_count(&self, delegation_id: &str) -> u32 {
        let mut count = self.retry_counts.entry(delegation_id.to_string()).or_insert(0);
        *count += 1;
        self.total_retries.fetch_add(1, Ordering::AcqRel);
        *count
    }

    /// Announces the retry and parks the delegation in RETRYING
    async fn announce_retry(
        &self,
        failure: &FailureContext,
        strategy: RecoveryStrategy,
        retry_count: u32,
        delay: Duration,
    ) -> anyhow::Result<()> {
        let next_retry_time =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.interface
            .notifier()
            .emit_retry(
                &failure.context,
                RetryNotice {
                    retry_count,
                    error_type: failure.error_type,
                    error_message: failure.error_message.clone(),
                    retry_features: failure.failed_features.clone(),
                    retry_strategy: strategy.as_str().to_string(),
                    next_retry_time,
                },
            )
            .await;
        self.interface
            .tracker()
            .update_delegation_state(
                &failure.context.delegation_id,
                DelegationState::Retrying,
                StateUpdate::default(),
            )
            .await?;
        info!(
            delegation_id = %failure.context.delegation_id,
            strategy = %strategy,
            retry_count = retry_count,
            delay_ms = delay.as_millis() as u64,
            "🔁 Retry scheduled"
        );
        Ok(())
    }

    /// Runs a recovery task, turning errors and panics into a failed outcome
    fn spawn_recovery<F>(
        self: &Arc<Self>,
        delegation_id: String,
        retry_count: u32,
        strategy: RecoveryStrategy,
        task: F,
    ) where
        F: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let recovery_id = format!("{delegation_id}_retry_{retry_count}");
        self.active_recoveries.insert(recovery_id.clone(), strategy);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let succeeded = match outcome {
                Ok(Ok(succeeded)) => succeeded,
                Ok(Err(e)) => {
                    this.record_recovery_error(&delegation_id, strategy, &e.to_string()).await;
                    false
                }
                Err(_) => {
                    this.record_recovery_error(&delegation_id, strategy, "recovery task panicked")
                        .await;
                    false
                }
            };
            this.record_recovery_outcome(&delegation_id, strategy, succeeded);
            this.active_recoveries.remove(&recovery_id);
        });
    }

    fn record_recovery_outcome(&self, delegation_id: &str, strategy: RecoveryStrategy, succeeded: bool) {
        self.breaker.record_outcome(!succeeded);
        let metric = if succeeded {
            metric_names::RECOVERY_SUCCEEDED
        } else {
            metric_names::RECOVERY_FAILED
        };
        emit_metric(
            self.interface.metrics().as_ref(),
            metric,
            1.0,
            json!({ "delegation_id": delegation_id, "strategy": strategy.as_str() }),
        );
        log_recovery_operation(
            delegation_id,
            strategy.as_str(),
            self.retry_count(delegation_id),
            if succeeded { "succeeded" } else { "failed" },
            None,
        );
    }

    async fn record_recovery_error(&self, delegation_id: &str, strategy: RecoveryStrategy, error: &str) {
        log_error(SOURCE, strategy.as_str(), error, Some(delegation_id));
        emit_error(
            self.interface.error_recorder().as_ref(),
            SOURCE,
            error,
            json!({ "delegation_id": delegation_id, "strategy": strategy.as_str() }),
        )
        .await;
    }

    async fn schedule_retry_all(self: &Arc<Self>, failure: FailureContext) -> anyhow::Result<()> {
        let delegation_id = failure.context.delegation_id.clone();
        let retry_count = self.next_retry_count(&delegation_id);
        let delay = retry_delay(&self.config, retry_count);
        self.announce_retry(&failure, RecoveryStrategy::RetryAll, retry_count, delay)
            .await?;

        let this = Arc::clone(self);
        self.spawn_recovery(delegation_id, retry_count, RecoveryStrategy::RetryAll, async move {
            tokio::time::sleep(delay).await;
            this.retry_all(failure, retry_count).await
        });
        Ok(())
    }

    /// Re-delegates the whole component under a derived id and copies the
    /// outcome back. Returns whether the retry succeeded.
    async fn retry_all(&self, failure: FailureContext, retry_count: u32) -> anyhow::Result<bool> {
        let delegation_id = failure.context.delegation_id.as_str();
        let component_id = failure.context.component_id.as_str();
        // Cancellation does not count against the breaker
        if self.is_cancelled(delegation_id).await {
            return Ok(true);
        }

        let spec: ComponentSpec = self
            .interface
            .store()
            .get_typed(&keys::component_definition(component_id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("component definition for {component_id} not found"))?;

        let derived_id = format!("{delegation_id}_retry_{retry_count}");
        self.derived_delegations
            .insert(derived_id.clone(), delegation_id.to_string());

        let result = self
            .interface
            .delegate_component(
                component_id,
                &spec,
                DelegateOptions::new()
                    .with_delegation_id(&derived_id)
                    .wait(Some(self.config.retry_wait_timeout())),
            )
            .await;
        info!(
            delegation_id = %delegation_id,
            retry_delegation_id = %derived_id,
            status = %result.status,
            "Retry delegation finished"
        );

        if self.is_cancelled(delegation_id).await {
            return Ok(true);
        }

        let tracker = self.interface.tracker();
        match result.status {
            ResultStatus::Complete | ResultStatus::Partial => {
                let state = result.state.unwrap_or(DelegationState::Completed);
                let mut update = StateUpdate::default()
                    .with_completed(result.completed_features.clone())
                    .with_failed(result.failed_features.clone());
                update.error_type = result.error_type;
                update.error_message = result.message.clone();
                let Some(record) = tracker
                    .update_delegation_state(delegation_id, state, update)
                    .await?
                else {
                    return Ok(true);
                };

                match record.state {
                    DelegationState::Completed => {
                        self.interface
                            .notifier()
                            .emit_completed(
                                &failure.context,
                                record.completed_features.clone(),
                                json!({
                                    "retry_count": retry_count,
                                    "retry_delegation_id": derived_id,
                                }),
                            )
                            .await;
                    }
                    DelegationState::Partial => {
                        self.emit_recovery_failure(
                            &failure,
                            &record,
                            result.error_type.unwrap_or(DelegationErrorType::FeatureImplementationFailed),
                            result.message.unwrap_or_else(|| failure.error_message.clone()),
                            true,
                        )
                        .await;
                    }
                    _ => {}
                }
                Ok(true)
            }
            _ => {
                let error_type = result.error_type.unwrap_or(failure.error_type);
                let message = result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("retry delegation {derived_id} ended as {}", result.status));
                let mut update = StateUpdate::error(error_type, &message);
                if result.delegation_id.is_some() {
                    update = update
                        .with_completed(result.completed_features.clone())
                        .with_failed(result.failed_features.clone());
                }
                if let Some(record) = tracker
                    .update_delegation_state(delegation_id, DelegationState::Failed, update)
                    .await?
                {
                    if record.state == DelegationState::Failed {
                        self.emit_recovery_failure(&failure, &record, error_type, message, false)
                            .await;
                    }
                }
                Ok(false)
            }
        }
    }

    async fn schedule_retry_individual(self: &Arc<Self>, failure: FailureContext) -> anyhow::Result<()> {
        let delegation_id = failure.context.delegation_id.clone();
        let retry_count = self.next_retry_count(&delegation_id);
        let delay = retry_delay(&self.config, retry_count);
        self.announce_retry(&failure, RecoveryStrategy::RetryIndividual, retry_count, delay)
            .await?;

        let this = Arc::clone(self);
        self.spawn_recovery(delegation_id, retry_count, RecoveryStrategy::RetryIndividual, async move {
            tokio::time::sleep(delay).await;
            this.retry_individual(failure, retry_count).await
        });
        Ok(())
    }

    /// Retries each failed feature on its own. The success signal requires
    /// the configured fraction of retried features to succeed.
    async fn retry_individual(&self, failure: FailureContext, retry_count: u32) -> anyhow::Result<bool> {
        let delegation_id = failure.context.delegation_id.as_str();
        let component_id = failure.context.component_id.as_str();
        // Cancellation does not count against the breaker
        if self.is_cancelled(delegation_id).await {
            return Ok(true);
        }

        let tracker = self.interface.tracker();
        let store = self.interface.store();
        let mut succeeded = 0usize;
        let mut retry_error_type = None;
        let attempted = failure.failed_features.len();

        for feature_id in &failure.failed_features {
            let definition: Option<FeatureSpec> = store
                .get_typed(&keys::feature_definition(feature_id))
                .await?;
            let (completed, error) = match definition {
                None => (false, Some("feature definition not found".to_string())),
                Some(feature) => match self
                    .interface
                    .executor()
                    .retry_feature(feature_id, &feature, component_id)
                    .await
                {
                    Ok(response) if response.is_success() => (true, None),
                    Ok(response) => (false, response.error),
                    Err(e) => (false, Some(e.to_string())),
                },
            };
            if completed {
                succeeded += 1;
            } else if let Some(message) = &error {
                retry_error_type.get_or_insert_with(|| classify_error_message(message, failure.error_type));
            }
            debug!(
                delegation_id = %delegation_id,
                feature_id = %feature_id,
                completed = completed,
                "Feature retry finished"
            );
            tracker
                .update_delegation_feature(delegation_id, feature_id, completed, error)
                .await?;
        }

        let success = attempted == 0
            || succeeded as f64 / attempted as f64 >= self.config.individual_success_ratio;

        let Some(mut record) = tracker.get_delegation_status(delegation_id).await else {
            return Ok(success);
        };
        if record.state == DelegationState::Retrying {
            if let Some(updated) = tracker
                .update_delegation_state(delegation_id, record.derived_state(), StateUpdate::default())
                .await?
            {
                record = updated;
            }
        }

        match record.state {
            DelegationState::Completed => {
                info!(delegation_id = %delegation_id, "✅ Delegation recovered by feature retries");
                self.interface
                    .notifier()
                    .emit_completed(
                        &failure.context,
                        record.completed_features.clone(),
                        json!({
                            "retry_count": retry_count,
                            "recovered_features": succeeded,
                        }),
                    )
                    .await;
            }
            DelegationState::Partial | DelegationState::Failed => {
                self.emit_recovery_failure(
                    &failure,
                    &record,
                    retry_error_type.unwrap_or(failure.error_type),
                    format!("{} of {attempted} feature retries failed", attempted - succeeded),
                    success,
                )
                .await;
            }
            _ => {}
        }
        Ok(success)
    }

    /// Accepts the current split as final
    async fn accept_partial_completion(&self, failure: FailureContext) -> anyhow::Result<()> {
        let delegation_id = failure.context.delegation_id.as_str();
        let record = self
            .interface
            .tracker()
            .update_delegation_state(delegation_id, DelegationState::Partial, StateUpdate::default())
            .await?
            .unwrap_or(failure.record);

        self.interface
            .notifier()
            .emit_completed(
                &failure.context,
                record.completed_features.clone(),
                json!({
                    "completed_features": record.completed_features,
                    "failed_features": record.failed_features,
                    "completion_percentage": record.progress_percentage,
                    "error_message": failure.error_message,
                }),
            )
            .await;
        self.record_recovery_outcome(delegation_id, RecoveryStrategy::PartialCompletion, true);
        Ok(())
    }

    /// Stores a stub artifact for every failed feature and completes the delegation
    async fn use_fallback_implementations(&self, failure: FailureContext) -> anyhow::Result<()> {
        let delegation_id = failure.context.delegation_id.as_str();
        let tracker = self.interface.tracker();
        let store = self.interface.store();

        for feature_id in &failure.failed_features {
            let feature: FeatureSpec = store
                .get_typed(&keys::feature_definition(feature_id))
                .await?
                .unwrap_or_else(|| FeatureSpec::new(feature_id.clone(), feature_id.clone(), ""));
            let artifact = generate_fallback_implementation(&feature, Some(&failure.error_message));
            store
                .set_typed(&keys::feature_implementation(feature_id), &artifact)
                .await?;
            tracker
                .update_delegation_feature(delegation_id, feature_id, true, None)
                .await?;
        }

        let record = tracker
            .update_delegation_state(delegation_id, DelegationState::Completed, StateUpdate::default())
            .await?
            .unwrap_or(failure.record);
        info!(
            delegation_id = %delegation_id,
            fallback_count = failure.failed_features.len(),
            "🩹 Delegation completed with fallback implementations"
        );
        self.interface
            .notifier()
            .emit_completed(
                &failure.context,
                record.completed_features.clone(),
                json!({
                    "message": "Completed with fallback implementations",
                    "fallback_count": failure.failed_features.len(),
                }),
            )
            .await;
        self.record_recovery_outcome(delegation_id, RecoveryStrategy::Fallback, true);
        Ok(())
    }

    /// Re-emits Failed on the original delegation after a recovery attempt
    async fn emit_recovery_failure(
        &self,
        failure: &FailureContext,
        record: &DelegationRecord,
        error_type: DelegationErrorType,
        message: String,
        recovery_succeeded: bool,
    ) {
        let mut report = FailureReport::new(error_type, message).with_features(
            record.failed_features.clone(),
            record.completed_features.clone(),
        );
        report.recovery_attempted = true;
        report.recovery_succeeded = recovery_succeeded;
        self.interface
            .notifier()
            .emit_failed(&failure.context, report)
            .await;
    }

    async fn is_cancelled(&self, delegation_id: &str) -> bool {
        let cancelled = self
            .interface
            .get_delegation_status(delegation_id)
            .await
            .is_some_and(|record| record.state == DelegationState::Cancelled);
        if cancelled {
            debug!(delegation_id = %delegation_id, "Delegation cancelled before retry ran");
        }
        cancelled
    }
}
