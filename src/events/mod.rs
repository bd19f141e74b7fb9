pub mod notifier;
pub mod types;

// Re-export key types for convenience
pub use notifier::{EventCallback, EventHandler, EventNotifier, FnHandler, SubscriptionId};
pub use types::{
    constants, DelegationEvent, EventContext, EventKind, EventPayload, FailureReport,
    FeatureSummary, ProgressUpdate, RetryNotice,
};
