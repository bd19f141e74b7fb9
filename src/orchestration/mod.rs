//! # Orchestration
//!
//! Delegation of components to the downstream feature subsystem.
//!
//! ## Core Components
//!
//! - **DelegationInterface**: validates, registers and dispatches a component, then
//!   polls the downstream subsystem until the delegation settles
//! - **FeatureExecutor**: the downstream boundary (kickoff, status, per-feature retry)
//! - **NestedExecutionCoordinator**: optional alternate dispatch path for kickoff
//! - **Aggregator**: combines per-feature artifacts into one output
//! - **Error classification**: the closed [`DelegationErrorType`] set

pub mod aggregator;
pub mod delegation_interface;
pub mod downstream;
pub mod error_classifier;
pub mod types;

pub use aggregator::{aggregate_implementations, is_declaration_line};
pub use delegation_interface::{DelegationInterface, DelegationInterfaceBuilder};
pub use downstream::{
    CultivationStatus, DownstreamError, FeatureExecutor, FeatureRetryResponse, FeatureStatus,
    KickoffResponse, NestedExecutionCoordinator, NestedExecutionRequest, ProgressInfo,
};
pub use error_classifier::{classify_error_message, DelegationErrorType};
pub use types::{
    AggregatedResult, CancellationResult, CleanupResult, DelegateOptions, DelegationResult,
    FeatureOutput, ResultStatus,
};
