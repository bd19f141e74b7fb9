//! # Component to Feature Mapper
//!
//! Pure transformation from a [`ComponentSpec`] to a validated batch of
//! [`FeatureSpec`]s. The mapper remembers which features each component
//! produced so later components can depend on them, and tracks the
//! cross-component edges it attached for cycle detection.

use crate::constants::metrics as metric_names;
use crate::error::{DelegationError, Result};
use crate::mapper::validation::{DependencyGraph, ValidationIssue, ValidationReport};
use crate::metrics::{emit_metric, MetricsSink};
use crate::models::{ComponentSpec, FeatureDraft, FeatureSpec};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mapper state recorded for one component at a point in time
#[derive(Debug, Clone)]
pub struct ComponentCheckpoint {
    component_id: String,
    features: Option<Vec<String>>,
    edges: Vec<(String, BTreeSet<String>)>,
}

pub struct ComponentToFeatureMapper {
    /// component id -> feature ids from its latest extraction
    component_features: RwLock<HashMap<String, Vec<String>>>,
    /// feature id -> cross-component dependencies attached by
    /// `establish_dependencies`
    tracked_dependencies: RwLock<HashMap<String, BTreeSet<String>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ComponentToFeatureMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentToFeatureMapper")
            .field("components", &self.component_features.read().len())
            .finish()
    }
}

impl ComponentToFeatureMapper {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            component_features: RwLock::new(HashMap::new()),
            tracked_dependencies: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Converts a component spec into features. A component without explicit
    /// features gets a single default feature carrying its full requirements.
    pub fn extract_features(&self, spec: &ComponentSpec) -> Result<Vec<FeatureSpec>> {
        let missing = spec.missing_fields();
        if !missing.is_empty() {
            return Err(DelegationError::InvalidComponent(format!(
                "component is missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let features: Vec<FeatureSpec> = if spec.features.is_empty() {
            vec![default_feature(spec)]
        } else {
            spec.features
                .iter()
                .map(|draft| feature_from_draft(spec, draft))
                .collect()
        };

        let feature_ids: Vec<String> = features.iter().map(|f| f.id.clone()).collect();
        self.component_features
            .write()
            .insert(spec.id.clone(), feature_ids);

        emit_metric(
            self.metrics.as_ref(),
            metric_names::FEATURES_EXTRACTED,
            features.len() as f64,
            json!({ "component_id": spec.id, "component_name": spec.name }),
        );
        info!(
            component_id = %spec.id,
            feature_count = features.len(),
            "🧩 Extracted features from component"
        );
        Ok(features)
    }

    /// Adds every feature of each dependent component as a dependency of every
    /// feature of `component_id`. Dependent components that were never
    /// extracted are skipped with a warning.
    pub fn establish_dependencies(
        &self,
        component_id: &str,
        dependent_component_ids: &[String],
    ) -> HashMap<String, Vec<String>> {
        let component_features = self.component_features.read();
        let Some(own_features) = component_features.get(component_id) else {
            warn!(component_id = %component_id, "No extracted features for component, skipping dependencies");
            return HashMap::new();
        };

        let mut tracked = self.tracked_dependencies.write();
        for dependent_id in dependent_component_ids {
            let Some(dependency_features) = component_features.get(dependent_id) else {
                warn!(
                    component_id = %component_id,
                    dependency_component_id = %dependent_id,
                    "Dependency component has no extracted features, skipping"
                );
                continue;
            };
            for feature_id in own_features {
                tracked
                    .entry(feature_id.clone())
                    .or_default()
                    .extend(dependency_features.iter().cloned());
            }
        }

        let result: HashMap<String, Vec<String>> = own_features
            .iter()
            .map(|feature_id| {
                let deps = tracked
                    .get(feature_id)
                    .map(|deps| deps.iter().cloned().collect())
                    .unwrap_or_default();
                (feature_id.clone(), deps)
            })
            .collect();

        let edge_count: usize = result.values().map(Vec::len).sum();
        emit_metric(
            self.metrics.as_ref(),
            metric_names::DEPENDENCIES_ESTABLISHED,
            edge_count as f64,
            json!({ "component_id": component_id, "dependency_components": dependent_component_ids }),
        );
        debug!(component_id = %component_id, edges = edge_count, "Established cross-component dependencies");
        result
    }

    /// Copies component-level metadata onto features that do not define it
    pub fn add_component_metadata(&self, features: &mut [FeatureSpec], spec: &ComponentSpec) {
        for feature in features.iter_mut() {
            feature.component_id = spec.id.clone();
            feature.component_name = spec.name.clone();
            if feature.requirements.is_empty() {
                feature.requirements = spec.requirements.clone();
            }
            if feature.priority.is_none() {
                feature.priority = spec.priority.clone();
            }
            if feature.guidelines.is_none() {
                feature.guidelines = spec.guidelines.clone();
            }
            if feature.data_flow.is_none() {
                feature.data_flow = spec.data_flow.clone();
            }
            if feature.public_interface.is_none() {
                feature.public_interface = spec.public_interface.clone();
            }
        }
    }

    /// Validates a feature batch without mutating it: required fields,
    /// duplicate ids, resolvable dependencies and cycles across batch-local
    /// and tracked edges.
    pub fn validate_features(&self, features: &[FeatureSpec]) -> ValidationReport {
        let mut issues = Vec::new();
        let known = self.known_features();
        let tracked = self.tracked_dependencies.read();

        let batch_ids: HashSet<&str> = features.iter().map(|f| f.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for feature in features {
            for (field, value) in [
                ("id", &feature.id),
                ("name", &feature.name),
                ("description", &feature.description),
            ] {
                if value.trim().is_empty() {
                    issues.push(ValidationIssue::missing_field(Some(feature.id.as_str()), field));
                }
            }

            if !feature.id.is_empty() && !seen.insert(feature.id.as_str()) {
                issues.push(ValidationIssue::duplicate_id(&feature.id));
            }

            let feature_tracked = tracked.get(&feature.id);
            for dependency in &feature.dependencies {
                let resolvable = batch_ids.contains(dependency.as_str())
                    || known.contains(dependency)
                    || feature_tracked.is_some_and(|deps| deps.contains(dependency));
                if !resolvable {
                    issues.push(ValidationIssue::invalid_dependency(&feature.id, dependency));
                }
            }
        }

        let mut graph = DependencyGraph::new();
        for feature in features {
            graph.add_edges(&feature.id, &feature.dependencies);
            if let Some(deps) = tracked.get(&feature.id) {
                graph.add_edges(&feature.id, deps);
            }
        }
        let mut tracked_nodes: Vec<&String> = tracked.keys().collect();
        tracked_nodes.sort();
        for node in tracked_nodes {
            if let Some(deps) = tracked.get(node) {
                graph.add_edges(node, deps);
            }
        }
        if let Some((from, to)) = graph.find_cycle() {
            issues.push(ValidationIssue::dependency_cycle(&from, &to));
        }

        if !issues.is_empty() {
            emit_metric(
                self.metrics.as_ref(),
                metric_names::VALIDATION_FAILED,
                issues.len() as f64,
                json!({ "issues": issues.iter().map(ValidationIssue::kind).collect::<Vec<_>>() }),
            );
            warn!(issue_count = issues.len(), "Feature validation failed");
        }
        ValidationReport::from_issues(issues)
    }

    /// Drops everything recorded for a component: its feature mapping and the
    /// tracked edges of those features
    pub fn forget_component(&self, component_id: &str) {
        let removed = self.component_features.write().remove(component_id);
        if let Some(feature_ids) = removed {
            let mut tracked = self.tracked_dependencies.write();
            for feature_id in feature_ids {
                tracked.remove(&feature_id);
            }
        }
    }

    /// Captures what is currently recorded for a component, taken before a new
    /// extraction so a rejected batch can be undone with [`Self::rollback_component`]
    pub fn checkpoint_component(&self, component_id: &str) -> ComponentCheckpoint {
        let features = self.component_features.read().get(component_id).cloned();
        let tracked = self.tracked_dependencies.read();
        let edges = features
            .iter()
            .flatten()
            .filter_map(|feature_id| {
                tracked
                    .get(feature_id)
                    .map(|deps| (feature_id.clone(), deps.clone()))
            })
            .collect();
        ComponentCheckpoint {
            component_id: component_id.to_string(),
            features,
            edges,
        }
    }

    /// Discards whatever the rejected batch recorded for the component and
    /// reinstates the mapping and edges of its previous accepted extraction
    pub fn rollback_component(&self, checkpoint: ComponentCheckpoint) {
        self.forget_component(&checkpoint.component_id);
        let Some(features) = checkpoint.features else {
            debug!(component_id = %checkpoint.component_id, "Rejected component had no earlier mapping");
            return;
        };

        let mut component_features = self.component_features.write();
        let mut tracked = self.tracked_dependencies.write();
        for (feature_id, deps) in checkpoint.edges {
            tracked.insert(feature_id, deps);
        }
        component_features.insert(checkpoint.component_id.clone(), features);
        debug!(component_id = %checkpoint.component_id, "Restored earlier component mapping");
    }

    pub fn get_component_feature_mapping(&self) -> HashMap<String, Vec<String>> {
        self.component_features.read().clone()
    }

    pub fn get_tracked_dependencies(&self, feature_id: &str) -> Vec<String> {
        self.tracked_dependencies
            .read()
            .get(feature_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn known_features(&self) -> HashSet<String> {
        self.component_features
            .read()
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Merges the map produced by `establish_dependencies` into the features
pub fn attach_dependencies(features: &mut [FeatureSpec], dependencies: &HashMap<String, Vec<String>>) {
    for feature in features.iter_mut() {
        if let Some(extra) = dependencies.get(&feature.id) {
            for dependency in extra {
                if !feature.dependencies.contains(dependency) {
                    feature.dependencies.push(dependency.clone());
                }
            }
        }
    }
}

fn default_feature(spec: &ComponentSpec) -> FeatureSpec {
    FeatureSpec {
        id: format!("feature_{}_main", spec.id),
        name: format!("{} Main Feature", spec.name),
        description: spec.description.clone(),
        dependencies: Vec::new(),
        component_id: spec.id.clone(),
        component_name: spec.name.clone(),
        requirements: spec.requirements.clone(),
        is_default: true,
        ..Default::default()
    }
}

fn feature_from_draft(spec: &ComponentSpec, draft: &FeatureDraft) -> FeatureSpec {
    let id = draft
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| generate_feature_id(&spec.id));
    FeatureSpec {
        id,
        name: draft.name.clone().unwrap_or_default(),
        description: draft.description.clone().unwrap_or_default(),
        dependencies: draft.dependencies.clone(),
        component_id: spec.id.clone(),
        component_name: spec.name.clone(),
        requirements: draft.requirements.clone().unwrap_or_default(),
        is_default: false,
        priority: draft.priority.clone(),
        guidelines: draft.guidelines.clone(),
        data_flow: draft.data_flow.clone(),
        public_interface: draft.public_interface.clone(),
    }
}

fn generate_feature_id(component_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("feature_{component_id}_{}", &suffix[..8])
}
