#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Delegation Core
//!
//! Delegates a component specification to a downstream feature-implementation
//! subsystem and follows it until every feature is delivered.
//!
//! ## Overview
//!
//! A component is broken into features, the features are validated as a
//! dependency DAG, and the batch is dispatched. The delegation is then polled
//! until it settles as completed, partially completed, failed, cancelled or
//! timed out. Lifecycle events fan out to subscribers, and a recovery handler
//! reacts to failures with retries, partial acceptance or fallback stubs
//! behind a circuit breaker.
//!
//! ## Module Organization
//!
//! - [`mapper`] - Component to feature extraction and dependency validation
//! - [`state`] - Delegation records, the state tracker and the key-value store boundary
//! - [`state_machine`] - Delegation lifecycle states
//! - [`events`] - Lifecycle events and the event notifier
//! - [`orchestration`] - The delegation interface and the downstream boundary
//! - [`resilience`] - Recovery strategies, circuit breaker and backoff
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use delegation_core::models::{ComponentSpec, FeatureDraft};
//! use delegation_core::orchestration::{DelegateOptions, DelegationInterface, FeatureExecutor};
//! use delegation_core::resilience::RecoveryHandler;
//! use std::sync::Arc;
//!
//! # async fn example(executor: Arc<dyn FeatureExecutor>) -> Result<(), Box<dyn std::error::Error>> {
//! let interface = DelegationInterface::builder(executor).build()?;
//! let _recovery = RecoveryHandler::new(&interface).attach();
//!
//! let spec = ComponentSpec::new("auth", "Authentication", "Login and token refresh")
//!     .with_feature(FeatureDraft::named("login", "Password login").with_id("auth_login"))
//!     .with_feature(FeatureDraft::named("refresh", "Token refresh").depends_on("auth_login"));
//!
//! let result = interface
//!     .delegate_component("auth", &spec, DelegateOptions::new().wait(None))
//!     .await;
//! println!("delegation finished with status {}", result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state;
pub mod state_machine;

pub use config::{DelegationConfig, ConfigLoader};
pub use error::{DelegationError, Result};
pub use events::{DelegationEvent, EventKind, EventNotifier};
pub use mapper::ComponentToFeatureMapper;
pub use models::{ComponentSpec, DelegationRecord, FeatureDraft, FeatureSpec};
pub use orchestration::{
    DelegateOptions, DelegationErrorType, DelegationInterface, DelegationResult, FeatureExecutor,
    ResultStatus,
};
pub use resilience::{CircuitBreaker, RecoveryHandler, RecoveryStrategy};
pub use state::{DelegationStateTracker, StateStore};
pub use state_machine::DelegationState;
