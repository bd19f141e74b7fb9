//! # Downstream Execution Boundary
//!
//! Traits for the subsystem that actually implements features, and for the
//! optional coordinator that runs the kickoff as a sub-phase of a larger
//! pipeline. Both are external collaborators; this crate only calls them.

use crate::models::FeatureSpec;
use crate::orchestration::error_classifier::DelegationErrorType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failures reported by the downstream subsystem
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DownstreamError {
    #[error("Downstream subsystem unavailable: {0}")]
    Unavailable(String),

    #[error("Downstream rejected the request: {0}")]
    Rejected(String),

    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Downstream call timed out: {0}")]
    Timeout(String),

    #[error("Downstream resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Downstream failure: {0}")]
    Other(String),
}

impl DownstreamError {
    pub fn error_type(&self) -> DelegationErrorType {
        match self {
            DownstreamError::Unavailable(_) => DelegationErrorType::PhaseThreeUnavailable,
            DownstreamError::Rejected(_) => DelegationErrorType::FeatureCreationFailed,
            DownstreamError::Communication(_) => DelegationErrorType::CommunicationError,
            DownstreamError::Timeout(_) => DelegationErrorType::Timeout,
            DownstreamError::ResourceExhausted(_) => DelegationErrorType::ResourceExhaustion,
            DownstreamError::Other(_) => DelegationErrorType::UnknownError,
        }
    }
}

/// Answer to a kickoff call. A present `error` means the downstream accepted
/// the call but could not create the features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KickoffResponse {
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KickoffResponse {
    pub fn accepted(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub completed_features: Vec<String>,
}

/// Snapshot of a dispatched batch as reported by the downstream subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CultivationStatus {
    pub status: OperationStatus,
    #[serde(default)]
    pub progress: ProgressInfo,
    #[serde(default)]
    pub completed_features: Vec<String>,
    #[serde(default)]
    pub failed_features: Vec<String>,
    /// Classification for the failed features, when the downstream knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<DelegationErrorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CultivationStatus {
    pub fn in_progress(completed_features: Vec<String>, percentage: f64) -> Self {
        Self {
            status: OperationStatus::InProgress,
            progress: ProgressInfo {
                percentage,
                completed_features: completed_features.clone(),
            },
            completed_features,
            failed_features: Vec::new(),
            error_type: None,
            error_message: None,
        }
    }

    pub fn completed(completed_features: Vec<String>, failed_features: Vec<String>) -> Self {
        let total = completed_features.len() + failed_features.len();
        let percentage = if total == 0 {
            100.0
        } else {
            completed_features.len() as f64 / total as f64 * 100.0
        };
        Self {
            status: OperationStatus::Completed,
            progress: ProgressInfo {
                percentage,
                completed_features: completed_features.clone(),
            },
            completed_features,
            failed_features,
            error_type: None,
            error_message: None,
        }
    }

    pub fn with_error(mut self, error_type: DelegationErrorType, message: impl Into<String>) -> Self {
        self.error_type = Some(error_type);
        self.error_message = Some(message.into());
        self
    }

    /// Failure text without a typed classification
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    /// Completed features from either the top level or the progress block
    pub fn reported_completed(&self) -> Vec<String> {
        let mut features = self.completed_features.clone();
        for id in &self.progress.completed_features {
            if !features.contains(id) {
                features.push(id.clone());
            }
        }
        features
    }
}

/// Per-feature artifact used during result aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub feature_id: String,
    #[serde(default)]
    pub feature_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureRetryStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRetryResponse {
    pub status: FeatureRetryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeatureRetryResponse {
    pub fn success() -> Self {
        Self {
            status: FeatureRetryStatus::Success,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: FeatureRetryStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FeatureRetryStatus::Success
    }
}

/// The downstream execution subsystem that implements and tests features
#[async_trait]
pub trait FeatureExecutor: Send + Sync {
    /// Asynchronous kickoff of a whole feature batch
    async fn start_feature_work(
        &self,
        features: &[FeatureSpec],
        operation_id: &str,
    ) -> Result<KickoffResponse, DownstreamError>;

    async fn get_cultivation_status(
        &self,
        operation_id: &str,
    ) -> Result<CultivationStatus, DownstreamError>;

    async fn get_feature_status(&self, feature_id: &str) -> Result<FeatureStatus, DownstreamError>;

    async fn retry_feature(
        &self,
        feature_id: &str,
        feature: &FeatureSpec,
        component_id: &str,
    ) -> Result<FeatureRetryResponse, DownstreamError>;
}

/// Kickoff request routed through a [`NestedExecutionCoordinator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedExecutionRequest {
    pub delegation_id: String,
    pub component_id: String,
    pub operation_id: String,
    pub features: Vec<FeatureSpec>,
}

/// Optional coordinator that intercepts kickoff to run it as a sub-phase of
/// a larger pipeline. Status polling still goes to the [`FeatureExecutor`].
#[async_trait]
pub trait NestedExecutionCoordinator: Send + Sync {
    async fn coordinate_nested_execution(
        &self,
        request: NestedExecutionRequest,
    ) -> Result<KickoffResponse, DownstreamError>;
}
