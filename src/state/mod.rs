//! Delegation state: the durable key-value boundary and the tracker that owns
//! every [`DelegationRecord`](crate::models::DelegationRecord).

pub mod store;
pub mod tracker;

pub use store::{FileStateStore, InMemoryStateStore, StateStore, StateStoreExt, StoreError};
pub use tracker::DelegationStateTracker;
