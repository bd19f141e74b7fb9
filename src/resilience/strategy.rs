use crate::orchestration::error_classifier::DelegationErrorType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a failed delegation is recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-delegate the whole component
    RetryAll,
    /// Retry only the failed features
    RetryIndividual,
    /// Accept what completed
    PartialCompletion,
    /// Replace failed features with stub artifacts
    Fallback,
    /// Count the failure against the shared breaker and stop
    CircuitBreaker,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryAll => "retry_all",
            Self::RetryIndividual => "retry_individual",
            Self::PartialCompletion => "partial_completion",
            Self::Fallback => "fallback",
            Self::CircuitBreaker => "circuit_breaker",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default error type to strategy table
pub fn default_strategy(error_type: DelegationErrorType) -> RecoveryStrategy {
    use DelegationErrorType::*;
    match error_type {
        InvalidComponent | InvalidFeature | ResourceExhaustion | UnknownError => {
            RecoveryStrategy::CircuitBreaker
        }
        PhaseThreeUnavailable | FeatureCreationFailed | Timeout | CommunicationError => {
            RecoveryStrategy::RetryAll
        }
        FeatureImplementationFailed | FeatureTestingFailed => RecoveryStrategy::RetryIndividual,
        DependencyFailure => RecoveryStrategy::PartialCompletion,
    }
}

/// Strategy table with per-error-type overrides on top of the defaults
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    overrides: HashMap<DelegationErrorType, RecoveryStrategy>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, error_type: DelegationErrorType, strategy: RecoveryStrategy) {
        self.overrides.insert(error_type, strategy);
    }

    pub fn strategy_for(&self, error_type: DelegationErrorType) -> RecoveryStrategy {
        self.overrides
            .get(&error_type)
            .copied()
            .unwrap_or_else(|| default_strategy(error_type))
    }
}
