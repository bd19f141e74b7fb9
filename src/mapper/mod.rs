//! Feature Mapper: component specification to validated feature batch.

pub mod feature_mapper;
pub mod validation;

pub use feature_mapper::{attach_dependencies, ComponentCheckpoint, ComponentToFeatureMapper};
pub use validation::{DependencyGraph, ValidationIssue, ValidationReport};
