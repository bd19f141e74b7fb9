use crate::models::feature::FeatureDraft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Component specification supplied by the upstream producer.
///
/// `id`, `name` and `description` must be non-empty; everything else is
/// optional. `requirements`, `guidelines`, `data_flow` and `public_interface`
/// are pass-through blobs owned by upstream and downstream collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    /// IDs of components whose features this component depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Explicit feature breakdown; a single default feature is synthesized when empty
    #[serde(default)]
    pub features: Vec<FeatureDraft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidelines: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_flow: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_interface: Option<Value>,
}

impl ComponentSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, feature: FeatureDraft) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_dependency(mut self, component_id: impl Into<String>) -> Self {
        self.dependencies.push(component_id.into());
        self
    }

    pub fn with_requirement(mut self, key: impl Into<String>, value: Value) -> Self {
        self.requirements.insert(key.into(), value);
        self
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        missing
    }
}
