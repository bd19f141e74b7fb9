//! # Delegation State Tracker
//!
//! Single source of truth for delegation lifecycle records. Each record sits
//! behind its own async mutex, so read-modify-write cycles on one delegation
//! are serialized while unrelated delegations never contend. Every mutation
//! is written to the [`StateStore`] before the in-memory copy is replaced.

use crate::constants::{keys, metrics as metric_names};
use crate::error::{DelegationError, Result};
use crate::logging::log_feature_operation;
use crate::metrics::{emit_metric, MetricsSink};
use crate::models::{DelegationRecord, StateUpdate};
use crate::state::store::{StateStore, StateStoreExt};
use crate::state_machine::DelegationState;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

type RecordCell = Arc<Mutex<DelegationRecord>>;

pub struct DelegationStateTracker {
    records: DashMap<String, RecordCell>,
    /// component id -> most recent delegation id
    component_delegations: DashMap<String, String>,
    /// feature id -> most recent delegation id
    feature_delegations: DashMap<String, String>,
    feature_components: DashMap<String, String>,
    store: Arc<dyn StateStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for DelegationStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationStateTracker")
            .field("records", &self.records.len())
            .finish()
    }
}

impl DelegationStateTracker {
    pub fn new(store: Arc<dyn StateStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            records: DashMap::new(),
            component_delegations: DashMap::new(),
            feature_delegations: DashMap::new(),
            feature_components: DashMap::new(),
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Creates a `Pending` record. Rejects an id that is already registered.
    #[instrument(skip(self, feature_ids), fields(feature_count = feature_ids.len()))]
    pub async fn register_delegation(
        &self,
        delegation_id: &str,
        component_id: &str,
        feature_ids: Vec<String>,
    ) -> Result<DelegationRecord> {
        let record = DelegationRecord::new(delegation_id, component_id, feature_ids);
        let cell: RecordCell = Arc::new(Mutex::new(record.clone()));
        let guard = cell.lock().await;

        match self.records.entry(delegation_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(delegation_id = %delegation_id, "Delegation already registered");
                return Err(DelegationError::DuplicateDelegation(delegation_id.to_string()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(cell.clone());
            }
        }

        if let Err(e) = self.persist(&record).await {
            drop(guard);
            self.records.remove(delegation_id);
            return Err(e);
        }
        drop(guard);

        self.component_delegations
            .insert(component_id.to_string(), delegation_id.to_string());
        for feature_id in &record.feature_ids {
            self.feature_delegations
                .insert(feature_id.clone(), delegation_id.to_string());
            self.feature_components
                .insert(feature_id.clone(), component_id.to_string());
        }

        emit_metric(
            self.metrics.as_ref(),
            metric_names::DELEGATION_REGISTERED,
            1.0,
            json!({
                "delegation_id": delegation_id,
                "component_id": component_id,
                "feature_count": record.feature_ids.len(),
            }),
        );
        info!(
            delegation_id = %delegation_id,
            component_id = %component_id,
            feature_count = record.feature_ids.len(),
            "📝 Delegation registered"
        );
        Ok(record)
    }

    /// Sets the delegation state and applies optional fields. Unknown ids are
    /// a no-op returning `None`. Leaving `Completed` or `Cancelled` is refused
    /// and the current record is returned unchanged.
    pub async fn update_delegation_state(
        &self,
        delegation_id: &str,
        state: DelegationState,
        update: StateUpdate,
    ) -> Result<Option<DelegationRecord>> {
        let Some(cell) = self.cell(delegation_id) else {
            warn!(delegation_id = %delegation_id, state = %state, "State update for unknown delegation");
            return Ok(None);
        };

        let mut guard = cell.lock().await;
        let previous = guard.state;
        if !previous.can_transition_to(state) {
            warn!(
                delegation_id = %delegation_id,
                from = %previous,
                to = %state,
                "Ignoring state transition out of a final state"
            );
            return Ok(Some(guard.clone()));
        }

        let mut next = guard.clone();
        next.apply_update(update);
        next.transition_to(state);
        self.persist(&next).await?;
        *guard = next.clone();
        drop(guard);

        self.record_state_change(&next, previous);
        Ok(Some(next))
    }

    /// Updates a feature on whichever delegation currently owns it
    pub async fn update_feature_status(
        &self,
        feature_id: &str,
        completed: bool,
        error: Option<String>,
    ) -> Result<Option<DelegationRecord>> {
        let Some(delegation_id) = self
            .feature_delegations
            .get(feature_id)
            .map(|entry| entry.value().clone())
        else {
            warn!(feature_id = %feature_id, "Feature status update for unknown feature");
            return Ok(None);
        };
        self.update_delegation_feature(&delegation_id, feature_id, completed, error)
            .await
    }

    /// Moves one feature of one delegation between the completed and failed
    /// sets, then derives the delegation state from the new split. Cancelled
    /// delegations keep their state.
    pub async fn update_delegation_feature(
        &self,
        delegation_id: &str,
        feature_id: &str,
        completed: bool,
        error: Option<String>,
    ) -> Result<Option<DelegationRecord>> {
        let Some(cell) = self.cell(delegation_id) else {
            warn!(delegation_id = %delegation_id, feature_id = %feature_id, "Feature update for unknown delegation");
            return Ok(None);
        };

        let mut guard = cell.lock().await;
        let previous = guard.state;
        let mut next = guard.clone();
        if !next.set_feature_status(feature_id, completed, error) {
            warn!(
                delegation_id = %delegation_id,
                feature_id = %feature_id,
                "Feature does not belong to delegation"
            );
            return Ok(Some(guard.clone()));
        }

        let derived = next.derived_state();
        if previous != DelegationState::Cancelled
            && derived != previous
            && previous.can_transition_to(derived)
        {
            next.transition_to(derived);
        } else {
            next.last_update_time = Utc::now();
        }

        self.persist(&next).await?;
        *guard = next.clone();
        drop(guard);

        emit_metric(
            self.metrics.as_ref(),
            metric_names::FEATURE_STATUS_CHANGED,
            next.progress_percentage,
            json!({
                "delegation_id": delegation_id,
                "feature_id": feature_id,
                "completed": completed,
            }),
        );
        log_feature_operation(
            "update_feature_status",
            Some(delegation_id),
            feature_id,
            if completed { "completed" } else { "failed" },
            Some(&format!("progress={:.1} state={}", next.progress_percentage, next.state)),
        );
        if next.state != previous {
            self.record_state_change(&next, previous);
        }
        Ok(Some(next))
    }

    pub async fn get_delegation_status(&self, delegation_id: &str) -> Option<DelegationRecord> {
        let cell = self.cell(delegation_id)?;
        let record = cell.lock().await.clone();
        Some(record)
    }

    pub async fn get_component_delegation_status(&self, component_id: &str) -> Option<DelegationRecord> {
        let delegation_id = self
            .component_delegations
            .get(component_id)
            .map(|entry| entry.value().clone())?;
        self.get_delegation_status(&delegation_id).await
    }

    pub async fn get_feature_delegation_status(&self, feature_id: &str) -> Option<DelegationRecord> {
        let delegation_id = self
            .feature_delegations
            .get(feature_id)
            .map(|entry| entry.value().clone())?;
        self.get_delegation_status(&delegation_id).await
    }

    /// Feature ids of the component's most recent delegation
    pub async fn get_component_features(&self, component_id: &str) -> Vec<String> {
        self.get_component_delegation_status(component_id)
            .await
            .map(|record| record.feature_ids)
            .unwrap_or_default()
    }

    pub fn get_feature_component(&self, feature_id: &str) -> Option<String> {
        self.feature_components
            .get(feature_id)
            .map(|entry| entry.value().clone())
    }

    pub async fn get_all_delegations(&self) -> Vec<DelegationRecord> {
        let mut records = Vec::with_capacity(self.records.len());
        for cell in self.cells() {
            records.push(cell.lock().await.clone());
        }
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        records
    }

    pub async fn get_delegations_by_state(&self, state: DelegationState) -> Vec<DelegationRecord> {
        self.get_all_delegations()
            .await
            .into_iter()
            .filter(|record| record.state == state)
            .collect()
    }

    /// Removes settled records older than `max_age_days` and returns their
    /// ids. Records still in an active state are never removed.
    #[instrument(skip(self))]
    pub async fn cleanup_old_delegations(&self, max_age_days: u32) -> Result<Vec<String>> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let mut removed = Vec::new();

        for (delegation_id, cell) in self.entries() {
            let guard = cell.lock().await;
            if guard.state.is_active() {
                continue;
            }
            let finished_at = guard
                .completion_time
                .or((guard.state == DelegationState::Partial).then_some(guard.last_update_time));
            let Some(finished_at) = finished_at else {
                continue;
            };
            if finished_at >= cutoff {
                continue;
            }

            self.store.delete(&keys::delegation_status(&delegation_id)).await?;
            self.records.remove(&delegation_id);
            self.component_delegations
                .remove_if(&guard.component_id, |_, owner| owner == &delegation_id);
            for feature_id in &guard.feature_ids {
                let released = self
                    .feature_delegations
                    .remove_if(feature_id, |_, owner| owner == &delegation_id)
                    .is_some();
                if released {
                    self.feature_components.remove(feature_id);
                }
            }
            removed.push(delegation_id);
        }

        if !removed.is_empty() {
            emit_metric(
                self.metrics.as_ref(),
                metric_names::DELEGATIONS_CLEANED,
                removed.len() as f64,
                json!({ "max_age_days": max_age_days }),
            );
        }
        info!(removed = removed.len(), max_age_days = max_age_days, "🧹 Cleaned up old delegations");
        Ok(removed)
    }

    /// Rehydrates records from the state store. Records already in memory are
    /// kept; unreadable entries are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn load_delegation_states(&self) -> Result<usize> {
        let keys = self
            .store
            .list_keys_by_prefix(keys::DELEGATION_PREFIX)
            .await?;
        let mut loaded = 0;

        for key in keys {
            let Some(delegation_id) = keys::parse_delegation_status_key(&key) else {
                continue;
            };
            if self.records.contains_key(delegation_id) {
                continue;
            }
            let record: DelegationRecord = match self.store.get_typed(&key).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable delegation record");
                    continue;
                }
            };

            self.component_delegations
                .entry(record.component_id.clone())
                .or_insert_with(|| record.delegation_id.clone());
            for feature_id in &record.feature_ids {
                self.feature_delegations
                    .entry(feature_id.clone())
                    .or_insert_with(|| record.delegation_id.clone());
                self.feature_components
                    .insert(feature_id.clone(), record.component_id.clone());
            }
            self.records
                .insert(record.delegation_id.clone(), Arc::new(Mutex::new(record)));
            loaded += 1;
        }

        info!(loaded = loaded, "📦 Loaded delegation states from store");
        Ok(loaded)
    }

    fn cell(&self, delegation_id: &str) -> Option<RecordCell> {
        self.records
            .get(delegation_id)
            .map(|entry| entry.value().clone())
    }

    fn cells(&self) -> Vec<RecordCell> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    fn entries(&self) -> Vec<(String, RecordCell)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn persist(&self, record: &DelegationRecord) -> Result<()> {
        self.store
            .set_typed(&keys::delegation_status(&record.delegation_id), record)
            .await?;
        Ok(())
    }

    fn record_state_change(&self, record: &DelegationRecord, previous: DelegationState) {
        emit_metric(
            self.metrics.as_ref(),
            metric_names::STATE_CHANGED,
            1.0,
            json!({
                "delegation_id": record.delegation_id,
                "component_id": record.component_id,
                "from": previous,
                "to": record.state,
            }),
        );
        debug!(
            delegation_id = %record.delegation_id,
            from = %previous,
            to = %record.state,
            "Delegation state changed"
        );
    }
}
