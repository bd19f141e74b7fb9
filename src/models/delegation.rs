use crate::orchestration::error_classifier::DelegationErrorType;
use crate::state_machine::DelegationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle record for one delegation attempt, owned by the state tracker.
///
/// `completed_features` and `failed_features` are always subsets of
/// `feature_ids` and never share an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation_id: String,
    pub component_id: String,
    pub state: DelegationState,
    pub feature_ids: Vec<String>,
    #[serde(default)]
    pub completed_features: Vec<String>,
    #[serde(default)]
    pub failed_features: Vec<String>,
    /// Last error reported per failed feature
    #[serde(default)]
    pub feature_errors: HashMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_type: Option<DelegationErrorType>,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub progress_percentage: f64,
}

impl DelegationRecord {
    pub fn new(
        delegation_id: impl Into<String>,
        component_id: impl Into<String>,
        feature_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            delegation_id: delegation_id.into(),
            component_id: component_id.into(),
            state: DelegationState::Pending,
            feature_ids,
            completed_features: Vec::new(),
            failed_features: Vec::new(),
            feature_errors: HashMap::new(),
            start_time: now,
            last_update_time: now,
            completion_time: None,
            error_message: None,
            error_type: None,
            operation_id: None,
            progress_percentage: 0.0,
        }
    }

    pub fn has_feature(&self, feature_id: &str) -> bool {
        self.feature_ids.iter().any(|id| id == feature_id)
    }

    pub fn is_feature_completed(&self, feature_id: &str) -> bool {
        self.completed_features.iter().any(|id| id == feature_id)
    }

    /// Features neither completed nor failed, in registration order
    pub fn pending_features(&self) -> Vec<String> {
        self.feature_ids
            .iter()
            .filter(|id| !self.completed_features.contains(id) && !self.failed_features.contains(id))
            .cloned()
            .collect()
    }

    /// Features not completed, in registration order
    pub fn non_completed_features(&self) -> Vec<String> {
        self.feature_ids
            .iter()
            .filter(|id| !self.completed_features.contains(id))
            .cloned()
            .collect()
    }

    /// Moves a feature into the completed or failed set. Returns false when
    /// the feature does not belong to this delegation.
    pub fn set_feature_status(&mut self, feature_id: &str, completed: bool, error: Option<String>) -> bool {
        if !self.has_feature(feature_id) {
            return false;
        }
        self.completed_features.retain(|id| id != feature_id);
        self.failed_features.retain(|id| id != feature_id);
        if completed {
            self.completed_features.push(feature_id.to_string());
            self.feature_errors.remove(feature_id);
        } else {
            self.failed_features.push(feature_id.to_string());
            if let Some(error) = error {
                self.feature_errors.insert(feature_id.to_string(), error);
            }
        }
        self.recompute_progress();
        true
    }

    pub fn recompute_progress(&mut self) {
        self.progress_percentage = if self.feature_ids.is_empty() {
            0.0
        } else {
            self.completed_features.len() as f64 / self.feature_ids.len() as f64 * 100.0
        };
    }

    /// State implied by the current per-feature split
    pub fn derived_state(&self) -> DelegationState {
        DelegationState::derive(
            self.feature_ids.len(),
            self.completed_features.len(),
            self.failed_features.len(),
        )
    }

    /// Sets the state, stamping `completion_time` on terminal states
    pub fn transition_to(&mut self, state: DelegationState) {
        let now = Utc::now();
        self.state = state;
        self.last_update_time = now;
        if state.is_terminal() {
            self.completion_time = Some(now);
        }
    }

    pub fn apply_update(&mut self, update: StateUpdate) {
        if let Some(message) = update.error_message {
            self.error_message = Some(message);
        }
        if let Some(error_type) = update.error_type {
            self.error_type = Some(error_type);
        }
        if let Some(operation_id) = update.operation_id {
            self.operation_id = Some(operation_id);
        }
        if let Some(completed) = update.completed_features {
            self.completed_features = self
                .feature_ids
                .iter()
                .filter(|id| completed.contains(id))
                .cloned()
                .collect();
            self.failed_features.retain(|id| !self.completed_features.contains(id));
        }
        if let Some(failed) = update.failed_features {
            self.failed_features = self
                .feature_ids
                .iter()
                .filter(|id| failed.contains(id) && !self.completed_features.contains(id))
                .cloned()
                .collect();
        }
        self.recompute_progress();
    }
}

/// Optional fields applied together with a state change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub error_message: Option<String>,
    pub error_type: Option<DelegationErrorType>,
    pub operation_id: Option<String>,
    pub completed_features: Option<Vec<String>>,
    pub failed_features: Option<Vec<String>>,
}

impl StateUpdate {
    pub fn error(error_type: DelegationErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_completed(mut self, features: Vec<String>) -> Self {
        self.completed_features = Some(features);
        self
    }

    pub fn with_failed(mut self, features: Vec<String>) -> Self {
        self.failed_features = Some(features);
        self
    }
}
