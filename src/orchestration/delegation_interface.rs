//! # Delegation Interface
//!
//! Entry point for handing a component to the downstream execution
//! subsystem. `delegate_component` maps and validates the feature batch,
//! registers it, then spawns one task per delegation that kicks off the
//! downstream work and polls it with backoff until it settles, times out or
//! is cancelled.
//!
//! ```text
//! delegate_component
//!   ├─ extract → dependencies → metadata → validate   (sync, may reject)
//!   ├─ register (PENDING) → Initiated event → INITIATED
//!   └─ spawn ──▶ IN_PROGRESS → kickoff → poll loop
//!                                 ├─ progress → Progress events
//!                                 ├─ completed → COMPLETED | PARTIAL | FAILED
//!                                 ├─ max wait → FAILED (timeout)
//!                                 └─ cancelled → exit without writing
//! ```

use crate::config::DelegationConfig;
use crate::constants::{keys, metrics as metric_names};
use crate::error::{DelegationError, Result};
use crate::events::{EventContext, EventNotifier, FailureReport, ProgressUpdate};
use crate::logging::{log_delegation_operation, log_error};
use crate::mapper::{attach_dependencies, ComponentToFeatureMapper};
use crate::metrics::{emit_error, emit_metric, ErrorRecorder, MetricsSink, TracingErrorRecorder, TracingMetricsSink};
use crate::models::{ComponentSpec, DelegationRecord, FeatureSpec, StateUpdate};
use crate::orchestration::aggregator::aggregate_implementations;
use crate::orchestration::downstream::{
    CultivationStatus, FeatureExecutor, NestedExecutionCoordinator, NestedExecutionRequest,
};
use crate::orchestration::error_classifier::{classify_error_message, DelegationErrorType};
use crate::orchestration::types::{
    AggregatedResult, CancellationResult, CleanupResult, DelegateOptions, DelegationResult,
    FeatureOutput, ResultStatus,
};
use crate::resilience::backoff::next_poll_interval;
use crate::resilience::fallback::is_fallback_artifact;
use crate::state::{DelegationStateTracker, InMemoryStateStore, StateStore, StateStoreExt};
use crate::state_machine::DelegationState;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Component-to-downstream delegation coordinator. Cheap to clone; clones
/// share all state.
#[derive(Clone)]
pub struct DelegationInterface {
    config: Arc<DelegationConfig>,
    mapper: Arc<ComponentToFeatureMapper>,
    tracker: Arc<DelegationStateTracker>,
    notifier: Arc<EventNotifier>,
    executor: Arc<dyn FeatureExecutor>,
    coordinator: Option<Arc<dyn NestedExecutionCoordinator>>,
    store: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsSink>,
    errors: Arc<dyn ErrorRecorder>,
    /// delegation id -> cancellation token of its running task
    active: Arc<DashMap<String, CancellationToken>>,
}

impl std::fmt::Debug for DelegationInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationInterface")
            .field("active_delegations", &self.active.len())
            .field("nested_execution", &self.coordinator.is_some())
            .finish()
    }
}

/// Builder for [`DelegationInterface`]. Only the downstream executor is
/// required; every other collaborator has an in-process default.
pub struct DelegationInterfaceBuilder {
    executor: Arc<dyn FeatureExecutor>,
    config: DelegationConfig,
    store: Option<Arc<dyn StateStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    errors: Option<Arc<dyn ErrorRecorder>>,
    coordinator: Option<Arc<dyn NestedExecutionCoordinator>>,
}

impl DelegationInterfaceBuilder {
    pub fn config(mut self, config: DelegationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn error_recorder(mut self, errors: Arc<dyn ErrorRecorder>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn nested_coordinator(mut self, coordinator: Arc<dyn NestedExecutionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn build(self) -> Result<DelegationInterface> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(TracingMetricsSink));
        let errors = self.errors.unwrap_or_else(|| Arc::new(TracingErrorRecorder));

        let tracker = Arc::new(DelegationStateTracker::new(store.clone(), metrics.clone()));
        let notifier = Arc::new(EventNotifier::new(
            store.clone(),
            metrics.clone(),
            self.config.events.clone(),
        ));

        info!(
            nested_execution = self.coordinator.is_some(),
            poll_initial_ms = self.config.polling.initial_interval_ms,
            poll_max_wait_ms = self.config.polling.max_wait_ms,
            "🚀 Delegation interface initialized"
        );

        Ok(DelegationInterface {
            config: Arc::new(self.config),
            mapper: Arc::new(ComponentToFeatureMapper::new(metrics.clone())),
            tracker,
            notifier,
            executor: self.executor,
            coordinator: self.coordinator,
            store,
            metrics,
            errors,
            active: Arc::new(DashMap::new()),
        })
    }
}

impl DelegationInterface {
    pub fn builder(executor: Arc<dyn FeatureExecutor>) -> DelegationInterfaceBuilder {
        DelegationInterfaceBuilder {
            executor,
            config: DelegationConfig::default(),
            store: None,
            metrics: None,
            errors: None,
            coordinator: None,
        }
    }

    pub fn config(&self) -> &DelegationConfig {
        &self.config
    }

    pub fn mapper(&self) -> &Arc<ComponentToFeatureMapper> {
        &self.mapper
    }

    pub fn tracker(&self) -> &Arc<DelegationStateTracker> {
        &self.tracker
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    pub fn executor(&self) -> &Arc<dyn FeatureExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn error_recorder(&self) -> &Arc<dyn ErrorRecorder> {
        &self.errors
    }

    /// Whether a delegation task is still running
    pub fn is_active(&self, delegation_id: &str) -> bool {
        self.active.contains_key(delegation_id)
    }

    /// Rehydrates delegation records from the state store
    pub async fn load_delegation_states(&self) -> Result<usize> {
        self.tracker.load_delegation_states().await
    }

    /// Delegates a component's features to the downstream subsystem.
    ///
    /// Invalid input is answered with `status: error` and nothing is
    /// registered. Otherwise the delegation runs in its own task; with
    /// `wait_for_completion` the caller waits for it up to the timeout, and a
    /// caller-side timeout leaves the task running.
    #[instrument(skip(self, spec, options), fields(delegation_id))]
    pub async fn delegate_component(
        &self,
        component_id: &str,
        spec: &ComponentSpec,
        options: DelegateOptions,
    ) -> DelegationResult {
        let mut spec = spec.clone();
        if spec.id != component_id {
            if !spec.id.is_empty() {
                warn!(spec_id = %spec.id, component_id = %component_id, "Component id differs from spec id, using component id");
            }
            spec.id = component_id.to_string();
        }

        let delegation_id = options
            .delegation_id
            .clone()
            .unwrap_or_else(|| generate_id("delegation", component_id));
        let operation_id = options
            .operation_id
            .clone()
            .unwrap_or_else(|| generate_id("op", component_id));
        tracing::Span::current().record("delegation_id", delegation_id.as_str());

        let features = match self.prepare_features(&spec) {
            Ok(features) => features,
            Err(e) => {
                warn!(component_id = %component_id, error = %e, "Component rejected before delegation");
                log_delegation_operation("delegate_component", None, Some(component_id), "rejected", Some(&e.to_string()));
                return DelegationResult::rejected(
                    component_id,
                    e.error_type(),
                    e.to_string(),
                    e.validation_issues().to_vec(),
                );
            }
        };

        let record = match self
            .register(&delegation_id, &spec, &features)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                log_error("delegation_interface", "register", &e.to_string(), Some(&delegation_id));
                let mut result = DelegationResult::rejected(component_id, e.error_type(), e.to_string(), Vec::new());
                result.delegation_id = Some(delegation_id);
                return result;
            }
        };

        let context = EventContext::new(&delegation_id, component_id)
            .with_operation_id(Some(operation_id.clone()));
        let expected = chrono::Duration::from_std(self.config.polling.max_wait())
            .ok()
            .map(|window| Utc::now() + window);
        self.notifier
            .emit_initiated(&context, &features, expected)
            .await;

        let record = match self
            .tracker
            .update_delegation_state(
                &delegation_id,
                DelegationState::Initiated,
                StateUpdate::default().with_operation_id(operation_id.clone()),
            )
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => record,
            Err(e) => {
                warn!(delegation_id = %delegation_id, error = %e, "Failed to persist initiated state");
                record
            }
        };

        let token = CancellationToken::new();
        self.active.insert(delegation_id.clone(), token.clone());
        let this = self.clone();
        let task_context = context.clone();
        let handle = tokio::spawn(async move {
            this.run_delegation(task_context, features, token).await;
        });

        emit_metric(
            self.metrics.as_ref(),
            metric_names::DELEGATION_STARTED,
            record.feature_ids.len() as f64,
            json!({ "delegation_id": delegation_id, "component_id": component_id }),
        );
        log_delegation_operation(
            "delegate_component",
            Some(&delegation_id),
            Some(component_id),
            "initiated",
            Some(&format!("{} feature(s)", record.feature_ids.len())),
        );

        if !options.wait_for_completion {
            return DelegationResult::from_record(ResultStatus::Initiated, &record).with_message(
                format!("Delegated {} feature(s) for execution", record.feature_ids.len()),
            );
        }

        let wait = options.timeout.unwrap_or_else(|| self.config.polling.max_wait());
        match tokio::time::timeout(wait, handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    warn!(delegation_id = %delegation_id, error = %e, "Delegation task ended abnormally");
                }
                let record = self
                    .tracker
                    .get_delegation_status(&delegation_id)
                    .await
                    .unwrap_or(record);
                DelegationResult::from_record(ResultStatus::from_state(record.state), &record)
            }
            Err(_) => {
                info!(
                    delegation_id = %delegation_id,
                    wait_ms = wait.as_millis() as u64,
                    "⏰ Wait for delegation timed out, task keeps running"
                );
                let record = self
                    .tracker
                    .get_delegation_status(&delegation_id)
                    .await
                    .unwrap_or(record);
                DelegationResult::from_record(ResultStatus::Timeout, &record).with_message(format!(
                    "Timed out after {:.1}s waiting for delegation",
                    wait.as_secs_f64()
                ))
            }
        }
    }

    fn prepare_features(&self, spec: &ComponentSpec) -> Result<Vec<FeatureSpec>> {
        let checkpoint = self.mapper.checkpoint_component(&spec.id);
        let mut features = self.mapper.extract_features(spec)?;
        if !spec.dependencies.is_empty() {
            let dependencies = self
                .mapper
                .establish_dependencies(&spec.id, &spec.dependencies);
            attach_dependencies(&mut features, &dependencies);
        }
        self.mapper.add_component_metadata(&mut features, spec);

        let report = self.mapper.validate_features(&features);
        if !report.is_valid() {
            self.mapper.rollback_component(checkpoint);
            return Err(DelegationError::InvalidFeatures(report.issues));
        }
        Ok(features)
    }

    /// Registers the record and stores the definitions retries reload
    async fn register(
        &self,
        delegation_id: &str,
        spec: &ComponentSpec,
        features: &[FeatureSpec],
    ) -> Result<DelegationRecord> {
        let feature_ids: Vec<String> = features.iter().map(|f| f.id.clone()).collect();
        let record = self
            .tracker
            .register_delegation(delegation_id, &spec.id, feature_ids.clone())
            .await?;

        // Explicit drafts may have had ids generated; pin them so a
        // re-delegation produces the same feature ids.
        let mut resolved = spec.clone();
        for (draft, feature) in resolved.features.iter_mut().zip(features) {
            draft.id = Some(feature.id.clone());
        }
        self.store
            .set_typed(&keys::component_definition(&spec.id), &resolved)
            .await?;
        for feature in features {
            self.store
                .set_typed(&keys::feature_definition(&feature.id), feature)
                .await?;
        }
        self.store
            .set_typed(&keys::component_features(&spec.id), &feature_ids)
            .await?;
        Ok(record)
    }

    async fn run_delegation(&self, context: EventContext, features: Vec<FeatureSpec>, token: CancellationToken) {
        let delegation_id = context.delegation_id.clone();
        let outcome = AssertUnwindSafe(self.drive_delegation(&context, &features, &token))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some((e.error_type(), e.to_string())),
            Err(panic) => Some((
                DelegationErrorType::UnknownError,
                format!("delegation task panicked: {}", panic_message(panic.as_ref())),
            )),
        };

        if let Some((error_type, message)) = failure {
            log_error("delegation_interface", "run_delegation", &message, Some(&delegation_id));
            emit_error(
                self.errors.as_ref(),
                "delegation_interface",
                &message,
                json!({
                    "delegation_id": delegation_id,
                    "component_id": context.component_id,
                    "error_type": error_type,
                }),
            )
            .await;
            if !token.is_cancelled() {
                self.fail_delegation(&context, error_type, &message, None).await;
            }
        }

        self.active.remove(&delegation_id);
        let state = self
            .tracker
            .get_delegation_status(&delegation_id)
            .await
            .map(|record| record.state.to_string())
            .unwrap_or_default();
        emit_metric(
            self.metrics.as_ref(),
            metric_names::DELEGATION_FINISHED,
            1.0,
            json!({ "delegation_id": delegation_id, "state": state }),
        );
        debug!(delegation_id = %delegation_id, state = %state, "Delegation task finished");
    }

    async fn drive_delegation(
        &self,
        context: &EventContext,
        features: &[FeatureSpec],
        token: &CancellationToken,
    ) -> Result<()> {
        let delegation_id = context.delegation_id.as_str();
        let requested_operation = context
            .operation_id
            .clone()
            .unwrap_or_else(|| generate_id("op", &context.component_id));

        if token.is_cancelled() {
            return Ok(());
        }
        self.tracker
            .update_delegation_state(delegation_id, DelegationState::InProgress, StateUpdate::default())
            .await?;

        let kickoff = match &self.coordinator {
            Some(coordinator) => {
                coordinator
                    .coordinate_nested_execution(NestedExecutionRequest {
                        delegation_id: delegation_id.to_string(),
                        component_id: context.component_id.clone(),
                        operation_id: requested_operation.clone(),
                        features: features.to_vec(),
                    })
                    .await
            }
            None => {
                self.executor
                    .start_feature_work(features, &requested_operation)
                    .await
            }
        };

        let operation_id = match kickoff {
            Err(e) => {
                warn!(delegation_id = %delegation_id, error = %e, "Feature kickoff failed");
                self.fail_delegation(context, e.error_type(), &e.to_string(), Some(feature_ids(features)))
                    .await;
                return Ok(());
            }
            Ok(response) => match response.error {
                Some(error) => {
                    warn!(delegation_id = %delegation_id, error = %error, "Downstream rejected feature batch");
                    self.fail_delegation(
                        context,
                        classify_error_message(&error, DelegationErrorType::FeatureCreationFailed),
                        &error,
                        Some(feature_ids(features)),
                    )
                    .await;
                    return Ok(());
                }
                None if response.operation_id.is_empty() => requested_operation,
                None => response.operation_id,
            },
        };

        let context = if context.operation_id.as_deref() != Some(operation_id.as_str()) {
            self.tracker
                .update_delegation_state(
                    delegation_id,
                    DelegationState::InProgress,
                    StateUpdate::default().with_operation_id(operation_id.clone()),
                )
                .await?;
            context.clone().with_operation_id(Some(operation_id.clone()))
        } else {
            context.clone()
        };

        info!(delegation_id = %delegation_id, operation_id = %operation_id, "📤 Feature work started");
        self.poll_until_settled(&context, &operation_id, token).await
    }

    async fn poll_until_settled(
        &self,
        context: &EventContext,
        operation_id: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let max_wait = self.config.polling.max_wait();
        let mut interval = self.config.polling.initial_interval();

        loop {
            if token.is_cancelled() {
                debug!(delegation_id = %context.delegation_id, "Delegation cancelled, leaving poll loop");
                return Ok(());
            }
            if started.elapsed() >= max_wait {
                return self.time_out(context, max_wait).await;
            }

            match self.executor.get_cultivation_status(operation_id).await {
                Ok(status) => {
                    if token.is_cancelled() {
                        return Ok(());
                    }
                    if status.is_completed() {
                        return self.settle(context, &status).await;
                    }
                    if self.record_progress(context, &status).await? {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(
                        delegation_id = %context.delegation_id,
                        operation_id = %operation_id,
                        error = %e,
                        "Status check failed, will retry"
                    );
                }
            }

            let remaining = max_wait.saturating_sub(started.elapsed());
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(delegation_id = %context.delegation_id, "Delegation cancelled during backoff");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval.min(remaining)) => {}
            }
            interval = next_poll_interval(&self.config.polling, interval);
        }
    }

    /// Marks newly reported completions. Returns true once every feature has
    /// completed ahead of the downstream completion signal.
    async fn record_progress(&self, context: &EventContext, status: &CultivationStatus) -> Result<bool> {
        let Some(mut record) = self.tracker.get_delegation_status(&context.delegation_id).await else {
            return Ok(true);
        };

        let newly_completed: Vec<String> = status
            .reported_completed()
            .into_iter()
            .filter(|id| record.has_feature(id) && !record.is_feature_completed(id))
            .collect();
        if newly_completed.is_empty() {
            return Ok(false);
        }

        for feature_id in &newly_completed {
            if let Some(updated) = self
                .tracker
                .update_delegation_feature(&context.delegation_id, feature_id, true, None)
                .await?
            {
                record = updated;
            }
        }

        if record.state == DelegationState::Completed {
            self.emit_outcome(context, &record, None, None).await;
            return Ok(true);
        }

        self.notifier
            .emit_progress(
                context,
                ProgressUpdate {
                    progress_percentage: record.progress_percentage,
                    completed_features: record.completed_features.clone(),
                    pending_features: record.pending_features(),
                    status_message: Some(format!(
                        "{} of {} features completed",
                        record.completed_features.len(),
                        record.feature_ids.len()
                    )),
                },
            )
            .await;
        Ok(false)
    }

    /// Applies the downstream's final report and emits the terminal event
    async fn settle(&self, context: &EventContext, status: &CultivationStatus) -> Result<()> {
        let delegation_id = context.delegation_id.as_str();
        let Some(record) = self.tracker.get_delegation_status(delegation_id).await else {
            return Ok(());
        };

        let completed = status.reported_completed();
        let failure_message = status.error_message.clone();
        let mut latest = record.clone();

        for feature_id in &record.feature_ids {
            if record.is_feature_completed(feature_id) {
                continue;
            }
            let update = if completed.contains(feature_id) {
                (true, None)
            } else if status.failed_features.contains(feature_id) {
                (false, failure_message.clone())
            } else {
                (false, Some("not reported by downstream".to_string()))
            };
            if let Some(updated) = self
                .tracker
                .update_delegation_feature(delegation_id, feature_id, update.0, update.1)
                .await?
            {
                latest = updated;
            }
        }

        let error_type = status.error_type.or_else(|| {
            failure_message
                .as_deref()
                .map(|message| classify_error_message(message, DelegationErrorType::FeatureImplementationFailed))
        });
        self.emit_outcome(context, &latest, error_type, failure_message)
            .await;
        Ok(())
    }

    async fn emit_outcome(
        &self,
        context: &EventContext,
        record: &DelegationRecord,
        error_type: Option<DelegationErrorType>,
        error_message: Option<String>,
    ) {
        let delegation_id = context.delegation_id.as_str();
        match record.state {
            DelegationState::Completed => {
                info!(delegation_id = %delegation_id, "✅ Delegation completed");
                self.notifier
                    .emit_completed(
                        context,
                        record.completed_features.clone(),
                        json!({
                            "feature_count": record.feature_ids.len(),
                            "completed_count": record.completed_features.len(),
                            "progress_percentage": record.progress_percentage,
                        }),
                    )
                    .await;
            }
            DelegationState::Partial | DelegationState::Failed => {
                let error_type = error_type.unwrap_or(DelegationErrorType::FeatureImplementationFailed);
                let message = error_message.unwrap_or_else(|| {
                    format!(
                        "{} of {} features failed",
                        record.failed_features.len(),
                        record.feature_ids.len()
                    )
                });
                let record = match self
                    .tracker
                    .update_delegation_state(delegation_id, record.state, StateUpdate::error(error_type, &message))
                    .await
                {
                    Ok(Some(updated)) => updated,
                    Ok(None) => record.clone(),
                    Err(e) => {
                        warn!(delegation_id = %delegation_id, error = %e, "Failed to persist failure details");
                        record.clone()
                    }
                };

                if record.state == DelegationState::Partial {
                    info!(
                        delegation_id = %delegation_id,
                        completed = record.completed_features.len(),
                        failed = record.failed_features.len(),
                        "🟠 Delegation partially completed"
                    );
                    self.notifier
                        .emit_progress(
                            context,
                            ProgressUpdate {
                                progress_percentage: record.progress_percentage,
                                completed_features: record.completed_features.clone(),
                                pending_features: Vec::new(),
                                status_message: Some(message.clone()),
                            },
                        )
                        .await;
                } else {
                    warn!(delegation_id = %delegation_id, error_type = %error_type, "❌ Delegation failed");
                }

                self.notifier
                    .emit_failed(
                        context,
                        FailureReport::new(error_type, message).with_features(
                            record.failed_features.clone(),
                            record.completed_features.clone(),
                        ),
                    )
                    .await;
            }
            other => {
                debug!(delegation_id = %delegation_id, state = %other, "No terminal event for state");
            }
        }
    }

    async fn time_out(&self, context: &EventContext, max_wait: Duration) -> Result<()> {
        let Some(record) = self.tracker.get_delegation_status(&context.delegation_id).await else {
            return Ok(());
        };
        warn!(
            delegation_id = %context.delegation_id,
            max_wait_ms = max_wait.as_millis() as u64,
            "⏰ Delegation exceeded max wait"
        );
        self.fail_delegation(
            context,
            DelegationErrorType::Timeout,
            &format!("Delegation timed out after {:.1}s", max_wait.as_secs_f64()),
            Some(record.non_completed_features()),
        )
        .await;
        Ok(())
    }

    /// Moves the delegation to FAILED and emits Failed. `failed_features`
    /// defaults to every non-completed feature.
    async fn fail_delegation(
        &self,
        context: &EventContext,
        error_type: DelegationErrorType,
        message: &str,
        failed_features: Option<Vec<String>>,
    ) {
        let delegation_id = context.delegation_id.as_str();
        let current = self.tracker.get_delegation_status(delegation_id).await;
        let failed = failed_features
            .or_else(|| current.as_ref().map(DelegationRecord::non_completed_features))
            .unwrap_or_default();

        let record = match self
            .tracker
            .update_delegation_state(
                delegation_id,
                DelegationState::Failed,
                StateUpdate::error(error_type, message).with_failed(failed.clone()),
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                log_error("delegation_interface", "fail_delegation", &e.to_string(), Some(delegation_id));
                current
            }
        };

        let completed = match &record {
            Some(record) if record.state == DelegationState::Failed => record.completed_features.clone(),
            Some(record) => {
                debug!(
                    delegation_id = %delegation_id,
                    state = %record.state,
                    "Delegation already settled, not emitting Failed"
                );
                return;
            }
            None => Vec::new(),
        };

        self.notifier
            .emit_failed(
                context,
                FailureReport::new(error_type, message).with_features(failed, completed),
            )
            .await;
    }

    pub async fn get_delegation_status(&self, delegation_id: &str) -> Option<DelegationRecord> {
        self.tracker.get_delegation_status(delegation_id).await
    }

    /// Record of the component's most recent delegation
    pub async fn get_component_status(&self, component_id: &str) -> Option<DelegationRecord> {
        self.tracker.get_component_delegation_status(component_id).await
    }

    /// Combines the artifacts of every completed feature into one output
    #[instrument(skip(self))]
    pub async fn get_delegation_result(&self, delegation_id: &str) -> AggregatedResult {
        let Some(record) = self.tracker.get_delegation_status(delegation_id).await else {
            return AggregatedResult::without_output(ResultStatus::NotFound, delegation_id, None)
                .with_message(format!("Delegation {delegation_id} not found"));
        };
        if record.state == DelegationState::Cancelled {
            return AggregatedResult::without_output(ResultStatus::Cancelled, delegation_id, Some(&record))
                .with_message(record.error_message.clone().unwrap_or_else(|| "cancelled".to_string()));
        }
        if !record.state.has_result() {
            return AggregatedResult::without_output(ResultStatus::InProgress, delegation_id, Some(&record))
                .with_message(format!("Delegation is {}", record.state));
        }

        let mut features = Vec::with_capacity(record.completed_features.len());
        for feature_id in &record.completed_features {
            features.push(self.feature_output(feature_id).await);
        }
        let output = aggregate_implementations(&record.component_id, &features);

        let mut result =
            AggregatedResult::without_output(ResultStatus::from_state(record.state), delegation_id, Some(&record));
        result.features = features;
        result.output = Some(output);
        result.message = record.error_message.clone();
        result
    }

    async fn feature_output(&self, feature_id: &str) -> FeatureOutput {
        let definition: Option<FeatureSpec> = self
            .store
            .get_typed(&keys::feature_definition(feature_id))
            .await
            .ok()
            .flatten();
        let mut output = FeatureOutput {
            feature_id: feature_id.to_string(),
            feature_name: definition.map_or_else(|| feature_id.to_string(), |f| f.name),
            implementation: None,
            is_fallback: false,
        };

        match self
            .store
            .get_typed::<String>(&keys::feature_implementation(feature_id))
            .await
        {
            Ok(Some(artifact)) => {
                output.is_fallback = is_fallback_artifact(&artifact);
                output.implementation = Some(artifact);
                return output;
            }
            Ok(None) => {}
            Err(e) => warn!(feature_id = %feature_id, error = %e, "Failed to read stored implementation"),
        }

        match self.executor.get_feature_status(feature_id).await {
            Ok(status) => {
                if !status.feature_name.is_empty() {
                    output.feature_name = status.feature_name;
                }
                output.implementation = status.implementation;
            }
            Err(e) => warn!(feature_id = %feature_id, error = %e, "Failed to fetch feature implementation"),
        }
        output
    }

    /// Cancels a delegation that has not settled. Completed features are kept;
    /// every other feature is reported as cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_delegation(&self, delegation_id: &str, reason: &str) -> CancellationResult {
        let Some(record) = self.tracker.get_delegation_status(delegation_id).await else {
            return CancellationResult::not_found(delegation_id);
        };
        if record.state.is_terminal() {
            return CancellationResult {
                status: ResultStatus::InvalidState,
                delegation_id: delegation_id.to_string(),
                cancelled_features: Vec::new(),
                state: Some(record.state),
                message: Some(format!("Cannot cancel delegation in state {}", record.state)),
            };
        }

        if let Some((_, token)) = self.active.remove(delegation_id) {
            token.cancel();
        }
        let retry_prefix = format!("{delegation_id}_retry_");
        self.active.retain(|id, token| {
            if id.starts_with(&retry_prefix) {
                token.cancel();
                false
            } else {
                true
            }
        });

        let update = StateUpdate {
            error_message: Some(format!("cancelled: {reason}")),
            ..StateUpdate::default()
        };
        let record = match self
            .tracker
            .update_delegation_state(delegation_id, DelegationState::Cancelled, update)
            .await
        {
            Ok(Some(record)) if record.state == DelegationState::Cancelled => record,
            Ok(Some(record)) => {
                return CancellationResult {
                    status: ResultStatus::InvalidState,
                    delegation_id: delegation_id.to_string(),
                    cancelled_features: Vec::new(),
                    state: Some(record.state),
                    message: Some(format!("Delegation settled as {} before cancellation", record.state)),
                };
            }
            Ok(None) => return CancellationResult::not_found(delegation_id),
            Err(e) => {
                log_error("delegation_interface", "cancel_delegation", &e.to_string(), Some(delegation_id));
                return CancellationResult {
                    status: ResultStatus::Error,
                    delegation_id: delegation_id.to_string(),
                    cancelled_features: Vec::new(),
                    state: Some(record.state),
                    message: Some(e.to_string()),
                };
            }
        };

        let cancelled = record.non_completed_features();
        let context = EventContext::new(delegation_id, &record.component_id)
            .with_operation_id(record.operation_id.clone());
        self.notifier
            .emit_cancelled(&context, reason, cancelled.clone(), record.completed_features.clone())
            .await;

        emit_metric(
            self.metrics.as_ref(),
            metric_names::DELEGATION_CANCELLED,
            cancelled.len() as f64,
            json!({ "delegation_id": delegation_id, "reason": reason }),
        );
        log_delegation_operation(
            "cancel_delegation",
            Some(delegation_id),
            Some(&record.component_id),
            "cancelled",
            Some(reason),
        );

        CancellationResult {
            status: ResultStatus::Cancelled,
            delegation_id: delegation_id.to_string(),
            cancelled_features: cancelled,
            state: Some(record.state),
            message: Some(format!("Delegation cancelled: {reason}")),
        }
    }

    /// Removes settled delegations older than `max_age_days` (configured
    /// default when `None`)
    pub async fn cleanup_completed_delegations(&self, max_age_days: Option<u32>) -> CleanupResult {
        let max_age_days = max_age_days.unwrap_or(self.config.cleanup.max_age_days);
        let (status, removed) = match self.tracker.cleanup_old_delegations(max_age_days).await {
            Ok(removed) => (ResultStatus::Success, removed),
            Err(e) => {
                log_error("delegation_interface", "cleanup", &e.to_string(), None);
                (ResultStatus::Error, Vec::new())
            }
        };
        for delegation_id in &removed {
            self.notifier.forget_delegation(delegation_id).await;
        }
        CleanupResult {
            status,
            cleaned_up_count: removed.len(),
            cleaned_up_delegations: removed,
            max_age_days,
            completed_at: Utc::now(),
        }
    }
}

fn generate_id(prefix: &str, component_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{component_id}_{}", &suffix[..8])
}

fn feature_ids(features: &[FeatureSpec]) -> Vec<String> {
    features.iter().map(|f| f.id.clone()).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
