use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A partially specified feature as supplied inside a [`ComponentSpec`](super::ComponentSpec)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidelines: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_flow: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_interface: Option<Value>,
}

impl FeatureDraft {
    pub fn named(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, feature_id: impl Into<String>) -> Self {
        self.dependencies.push(feature_id.into());
        self
    }
}

/// Fully resolved feature: the smallest delegable unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Feature IDs, possibly owned by other components
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub component_id: String,
    pub component_name: String,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    /// Set on the feature synthesized for a component without explicit features
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidelines: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_flow: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_interface: Option<Value>,
}

impl FeatureSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}
