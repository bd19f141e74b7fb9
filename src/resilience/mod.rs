//! # Resilience Module
//!
//! Recovery of failed delegations.
//!
//! ## Architecture
//!
//! - **Recovery Handler**: subscribes to Failed events and runs a strategy per error type
//! - **Strategy Table**: error type to [`RecoveryStrategy`], overridable per handler
//! - **Circuit Breaker**: one breaker gates every recovery attempt
//! - **Backoff**: jittered exponential retry delays and polling intervals
//! - **Fallback**: labeled stub artifacts for features that could not be delivered
//!
//! ## Usage
//!
//! ```rust,no_run
//! use delegation_core::orchestration::DelegationInterface;
//! use delegation_core::resilience::{RecoveryHandler, RecoveryStrategy};
//! use delegation_core::orchestration::DelegationErrorType;
//!
//! # fn example(interface: &DelegationInterface) {
//! let handler = RecoveryHandler::new(interface)
//!     .with_strategy(DelegationErrorType::Timeout, RecoveryStrategy::Fallback)
//!     .attach();
//!
//! println!("breaker: {}", handler.get_circuit_breaker_status().state);
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod recovery_handler;
pub mod strategy;

pub use backoff::{next_poll_interval, retry_delay, retry_delay_with_sample};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use fallback::{generate_fallback_implementation, is_fallback_artifact, FALLBACK_MARKER};
pub use recovery_handler::{RecoveryHandler, RecoveryStatistics};
pub use strategy::{default_strategy, RecoveryStrategy, StrategyTable};
