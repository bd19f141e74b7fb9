//! Stub artifacts that stand in for features the downstream subsystem could
//! not deliver.

use crate::models::FeatureSpec;
use chrono::Utc;

/// First line of every generated artifact
pub const FALLBACK_MARKER: &str = "# Fallback implementation for";

pub fn generate_fallback_implementation(feature: &FeatureSpec, reason: Option<&str>) -> String {
    let type_name: String = feature
        .name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    let type_name = if type_name.is_empty() {
        "Feature".to_string()
    } else {
        type_name
    };

    let mut artifact = format!(
        "{FALLBACK_MARKER} {name} ({id})\n\
         # Generated at {generated_at}\n\
         # This is a stub implementation created by the recovery system.\n\
         # Description: {description}\n",
        name = feature.name,
        id = feature.id,
        generated_at = Utc::now().to_rfc3339(),
        description = feature.description,
    );
    if let Some(reason) = reason {
        artifact.push_str(&format!("# Reason: {reason}\n"));
    }
    artifact.push_str(&format!(
        "\nclass {type_name}Fallback:\n    \
             feature_id = \"{id}\"\n    \
             is_fallback = True\n\n    \
             def execute(self, *args, **kwargs):\n        \
                 return {{\"status\": \"fallback\", \"feature_id\": \"{id}\"}}\n",
        id = feature.id,
    ));
    artifact
}

pub fn is_fallback_artifact(artifact: &str) -> bool {
    artifact.starts_with(FALLBACK_MARKER)
}
