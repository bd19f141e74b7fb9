use crate::orchestration::error_classifier::DelegationErrorType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle event names
pub mod constants {
    pub const DELEGATION_INITIATED: &str = "delegation_initiated";
    pub const DELEGATION_PROGRESS: &str = "delegation_progress";
    pub const DELEGATION_COMPLETED: &str = "delegation_completed";
    pub const DELEGATION_FAILED: &str = "delegation_failed";
    pub const DELEGATION_CANCELLED: &str = "delegation_cancelled";
    pub const DELEGATION_RETRY: &str = "delegation_retry";
}

/// Subscription key: one entry per lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Initiated,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Retry,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Initiated,
        Self::Progress,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => constants::DELEGATION_INITIATED,
            Self::Progress => constants::DELEGATION_PROGRESS,
            Self::Completed => constants::DELEGATION_COMPLETED,
            Self::Failed => constants::DELEGATION_FAILED,
            Self::Cancelled => constants::DELEGATION_CANCELLED,
            Self::Retry => constants::DELEGATION_RETRY,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every event of one delegation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub delegation_id: String,
    pub component_id: String,
    #[serde(default)]
    pub operation_id: Option<String>,
}

impl EventContext {
    pub fn new(delegation_id: impl Into<String>, component_id: impl Into<String>) -> Self {
        Self {
            delegation_id: delegation_id.into(),
            component_id: component_id.into(),
            operation_id: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: Option<String>) -> Self {
        self.operation_id = operation_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub id: String,
    pub name: String,
}

/// Kind-specific event fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    #[serde(rename = "delegation_initiated")]
    Initiated {
        feature_count: usize,
        features: Vec<FeatureSummary>,
        delegated_to: String,
        expected_completion_time: Option<DateTime<Utc>>,
    },
    #[serde(rename = "delegation_progress")]
    Progress {
        progress_percentage: f64,
        completed_features: Vec<String>,
        pending_features: Vec<String>,
        status_message: Option<String>,
    },
    #[serde(rename = "delegation_completed")]
    Completed {
        completed_features: Vec<String>,
        execution_time_seconds: f64,
        result_summary: Value,
    },
    #[serde(rename = "delegation_failed")]
    Failed {
        error_type: DelegationErrorType,
        error_message: String,
        failed_features: Vec<String>,
        completed_features: Vec<String>,
        execution_time_seconds: f64,
        recovery_attempted: bool,
        recovery_succeeded: bool,
    },
    #[serde(rename = "delegation_cancelled")]
    Cancelled {
        reason: String,
        cancelled_features: Vec<String>,
        completed_features: Vec<String>,
        execution_time_seconds: f64,
    },
    #[serde(rename = "delegation_retry")]
    Retry {
        retry_count: u32,
        error_type: DelegationErrorType,
        error_message: String,
        retry_features: Vec<String>,
        retry_strategy: String,
        next_retry_time: DateTime<Utc>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Initiated { .. } => EventKind::Initiated,
            Self::Progress { .. } => EventKind::Progress,
            Self::Completed { .. } => EventKind::Completed,
            Self::Failed { .. } => EventKind::Failed,
            Self::Cancelled { .. } => EventKind::Cancelled,
            Self::Retry { .. } => EventKind::Retry,
        }
    }
}

/// A lifecycle event as delivered to subscribers and kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationEvent {
    pub delegation_id: String,
    pub component_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DelegationEvent {
    pub fn new(context: &EventContext, payload: EventPayload) -> Self {
        Self {
            delegation_id: context.delegation_id.clone(),
            component_id: context.component_id.clone(),
            timestamp: Utc::now(),
            operation_id: context.operation_id.clone(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn context(&self) -> EventContext {
        EventContext {
            delegation_id: self.delegation_id.clone(),
            component_id: self.component_id.clone(),
            operation_id: self.operation_id.clone(),
        }
    }
}

/// Fields of a Progress event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub progress_percentage: f64,
    pub completed_features: Vec<String>,
    pub pending_features: Vec<String>,
    pub status_message: Option<String>,
}

/// Fields of a Failed event; execution time is computed by the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub error_type: DelegationErrorType,
    pub error_message: String,
    pub failed_features: Vec<String>,
    pub completed_features: Vec<String>,
    pub recovery_attempted: bool,
    pub recovery_succeeded: bool,
}

impl FailureReport {
    pub fn new(error_type: DelegationErrorType, error_message: impl Into<String>) -> Self {
        Self {
            error_type,
            error_message: error_message.into(),
            failed_features: Vec::new(),
            completed_features: Vec::new(),
            recovery_attempted: false,
            recovery_succeeded: false,
        }
    }

    pub fn with_features(mut self, failed: Vec<String>, completed: Vec<String>) -> Self {
        self.failed_features = failed;
        self.completed_features = completed;
        self
    }
}

/// Fields of a Retry event
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub retry_count: u32,
    pub error_type: DelegationErrorType,
    pub error_message: String,
    pub retry_features: Vec<String>,
    pub retry_strategy: String,
    pub next_retry_time: DateTime<Utc>,
}
