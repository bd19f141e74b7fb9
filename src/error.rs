use crate::mapper::ValidationIssue;
use crate::orchestration::downstream::DownstreamError;
use crate::orchestration::error_classifier::DelegationErrorType;
use crate::state::store::StoreError;

/// Crate-wide error type.
///
/// Every variant maps onto the closed [`DelegationErrorType`] taxonomy through
/// [`DelegationError::error_type`], which is what ends up on delegation records,
/// Failed events and recovery strategy selection.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Invalid component: {0}")]
    InvalidComponent(String),

    #[error("Feature validation failed with {} issue(s)", .0.len())]
    InvalidFeatures(Vec<ValidationIssue>),

    #[error("Delegation already registered: {0}")]
    DuplicateDelegation(String),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Downstream error: {0}")]
    Downstream(#[from] DownstreamError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DelegationError {
    pub fn error_type(&self) -> DelegationErrorType {
        match self {
            DelegationError::InvalidComponent(_) => DelegationErrorType::InvalidComponent,
            DelegationError::InvalidFeatures(_) => DelegationErrorType::InvalidFeature,
            DelegationError::Downstream(e) => e.error_type(),
            DelegationError::Store(_)
            | DelegationError::DuplicateDelegation(_)
            | DelegationError::Serialization(_)
            | DelegationError::Configuration(_) => DelegationErrorType::UnknownError,
        }
    }

    /// Validation issues carried by this error, empty for every other variant
    pub fn validation_issues(&self) -> &[ValidationIssue] {
        match self {
            DelegationError::InvalidFeatures(issues) => issues,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, DelegationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_mapping() {
        assert_eq!(
            DelegationError::InvalidComponent("missing name".into()).error_type(),
            DelegationErrorType::InvalidComponent
        );
        assert_eq!(
            DelegationError::InvalidFeatures(vec![]).error_type(),
            DelegationErrorType::InvalidFeature
        );
        assert_eq!(
            DelegationError::Downstream(DownstreamError::Unavailable("down".into())).error_type(),
            DelegationErrorType::PhaseThreeUnavailable
        );
        assert_eq!(
            DelegationError::Configuration("bad jitter".into()).error_type(),
            DelegationErrorType::UnknownError
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = DelegationError::DuplicateDelegation("delegation_c1_abc".into());
        assert_eq!(
            err.to_string(),
            "Delegation already registered: delegation_c1_abc"
        );
    }
}
