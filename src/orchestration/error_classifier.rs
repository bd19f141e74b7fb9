//! # Delegation Error Classification
//!
//! The closed error taxonomy shared by delegation failures and recovery
//! strategy selection, plus classification of free-form error text reported
//! by the downstream execution subsystem.
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────────┐     ┌──────────────────┐
//! │ DownstreamError  │────▶│ DelegationErrorType │────▶│ RecoveryStrategy │
//! │ / error message  │     │ (closed taxonomy)   │     │ (strategy table) │
//! └──────────────────┘     └─────────────────────┘     └──────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classification carried on delegation records and Failed events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationErrorType {
    /// Malformed component specification
    InvalidComponent,
    /// Feature batch failed validation
    InvalidFeature,
    /// Downstream subsystem unreachable or refusing kickoff
    PhaseThreeUnavailable,
    /// Downstream accepted the call but could not create the features
    FeatureCreationFailed,
    FeatureImplementationFailed,
    FeatureTestingFailed,
    Timeout,
    ResourceExhaustion,
    DependencyFailure,
    CommunicationError,
    UnknownError,
}

impl DelegationErrorType {
    pub const ALL: [DelegationErrorType; 11] = [
        Self::InvalidComponent,
        Self::InvalidFeature,
        Self::PhaseThreeUnavailable,
        Self::FeatureCreationFailed,
        Self::FeatureImplementationFailed,
        Self::FeatureTestingFailed,
        Self::Timeout,
        Self::ResourceExhaustion,
        Self::DependencyFailure,
        Self::CommunicationError,
        Self::UnknownError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidComponent => "invalid_component",
            Self::InvalidFeature => "invalid_feature",
            Self::PhaseThreeUnavailable => "phase_three_unavailable",
            Self::FeatureCreationFailed => "feature_creation_failed",
            Self::FeatureImplementationFailed => "feature_implementation_failed",
            Self::FeatureTestingFailed => "feature_testing_failed",
            Self::Timeout => "timeout",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DependencyFailure => "dependency_failure",
            Self::CommunicationError => "communication_error",
            Self::UnknownError => "unknown_error",
        }
    }

    /// Errors caused by the input itself; retrying the same input cannot help
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidComponent | Self::InvalidFeature)
    }
}

impl fmt::Display for DelegationErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DelegationErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid delegation error type: {s}"))
    }
}

/// Classifies a free-form failure message from the downstream subsystem.
///
/// Falls back to `default` when no keyword matches.
pub fn classify_error_message(message: &str, default: DelegationErrorType) -> DelegationErrorType {
    let reason = message.to_lowercase();
    if reason.contains("timeout") || reason.contains("timed out") {
        DelegationErrorType::Timeout
    } else if reason.contains("connection")
        || reason.contains("network")
        || reason.contains("unreachable")
    {
        DelegationErrorType::CommunicationError
    } else if reason.contains("resource")
        || reason.contains("memory")
        || reason.contains("quota")
        || reason.contains("disk")
    {
        DelegationErrorType::ResourceExhaustion
    } else if reason.contains("dependency") || reason.contains("dependencies") {
        DelegationErrorType::DependencyFailure
    } else if reason.contains("test") {
        DelegationErrorType::FeatureTestingFailed
    } else {
        default
    }
}
