// Delegation lifecycle states and the per-feature derivation rule.

pub mod states;

pub use states::DelegationState;
