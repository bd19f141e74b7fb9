//! # Delegation Result Types
//!
//! Caller-facing result shapes. Every top-level operation answers with a
//! `status` discriminator instead of an error, so callers branch on
//! [`ResultStatus`] rather than on error types.

use crate::mapper::ValidationIssue;
use crate::models::DelegationRecord;
use crate::orchestration::error_classifier::DelegationErrorType;
use crate::state_machine::DelegationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Initiated,
    Complete,
    Partial,
    Timeout,
    Error,
    NotFound,
    InvalidState,
    Cancelled,
    /// Result requested before the delegation settled
    InProgress,
    Success,
}

impl ResultStatus {
    /// Caller-facing status for a settled delegation record
    pub fn from_state(state: DelegationState) -> Self {
        match state {
            DelegationState::Completed => Self::Complete,
            DelegationState::Partial => Self::Partial,
            DelegationState::Failed => Self::Error,
            DelegationState::Cancelled => Self::Cancelled,
            DelegationState::Pending
            | DelegationState::Initiated
            | DelegationState::InProgress
            | DelegationState::Retrying => Self::InProgress,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::InProgress => "in_progress",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional knobs for `delegate_component`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegateOptions {
    pub operation_id: Option<String>,
    pub wait_for_completion: bool,
    /// Caller-side wait limit; defaults to the polling max wait
    pub timeout: Option<Duration>,
    /// Pre-assigned delegation id, used for derived retry delegations
    pub delegation_id: Option<String>,
}

impl DelegateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, timeout: Option<Duration>) -> Self {
        self.wait_for_completion = true;
        self.timeout = timeout;
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_delegation_id(mut self, delegation_id: impl Into<String>) -> Self {
        self.delegation_id = Some(delegation_id.into());
        self
    }
}

/// Answer to `delegate_component`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationResult {
    pub status: ResultStatus,
    pub component_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub feature_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DelegationState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<DelegationErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationIssue>,
}

impl DelegationResult {
    fn base(status: ResultStatus, component_id: &str) -> Self {
        Self {
            status,
            component_id: component_id.to_string(),
            delegation_id: None,
            operation_id: None,
            feature_count: 0,
            state: None,
            completed_features: Vec::new(),
            failed_features: Vec::new(),
            error_type: None,
            message: None,
            validation_errors: Vec::new(),
        }
    }

    /// Rejected before registration
    pub fn rejected(
        component_id: &str,
        error_type: DelegationErrorType,
        message: impl Into<String>,
        validation_errors: Vec<ValidationIssue>,
    ) -> Self {
        Self {
            error_type: Some(error_type),
            message: Some(message.into()),
            validation_errors,
            ..Self::base(ResultStatus::Error, component_id)
        }
    }

    /// Snapshot of a record under the given status
    pub fn from_record(status: ResultStatus, record: &DelegationRecord) -> Self {
        Self {
            delegation_id: Some(record.delegation_id.clone()),
            operation_id: record.operation_id.clone(),
            feature_count: record.feature_ids.len(),
            state: Some(record.state),
            completed_features: record.completed_features.clone(),
            failed_features: record.failed_features.clone(),
            error_type: record.error_type,
            message: record.error_message.clone(),
            ..Self::base(status, &record.component_id)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.delegation_id.is_some() && self.status != ResultStatus::Error
    }
}

/// Answer to `cancel_delegation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub status: ResultStatus,
    pub delegation_id: String,
    #[serde(default)]
    pub cancelled_features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DelegationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CancellationResult {
    pub fn not_found(delegation_id: &str) -> Self {
        Self {
            status: ResultStatus::NotFound,
            delegation_id: delegation_id.to_string(),
            cancelled_features: Vec::new(),
            state: None,
            message: Some(format!("Delegation {delegation_id} not found")),
        }
    }
}

/// One feature's contribution to an aggregated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOutput {
    pub feature_id: String,
    pub feature_name: String,
    pub implementation: Option<String>,
    pub is_fallback: bool,
}

/// Answer to `get_delegation_result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub status: ResultStatus,
    pub delegation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DelegationState>,
    #[serde(default)]
    pub completed_features: Vec<String>,
    #[serde(default)]
    pub failed_features: Vec<String>,
    #[serde(default)]
    pub features: Vec<FeatureOutput>,
    /// Combined artifact of every feature that produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AggregatedResult {
    pub fn without_output(status: ResultStatus, delegation_id: &str, record: Option<&DelegationRecord>) -> Self {
        Self {
            status,
            delegation_id: delegation_id.to_string(),
            component_id: record.map(|r| r.component_id.clone()),
            state: record.map(|r| r.state),
            completed_features: record.map(|r| r.completed_features.clone()).unwrap_or_default(),
            failed_features: record.map(|r| r.failed_features.clone()).unwrap_or_default(),
            features: Vec::new(),
            output: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Answer to `cleanup_completed_delegations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub status: ResultStatus,
    pub cleaned_up_count: usize,
    pub cleaned_up_delegations: Vec<String>,
    pub max_age_days: u32,
    pub completed_at: DateTime<Utc>,
}
