pub mod component;
pub mod delegation;
pub mod feature;

pub use component::ComponentSpec;
pub use delegation::{DelegationRecord, StateUpdate};
pub use feature::{FeatureDraft, FeatureSpec};
