//! Feature batch validation: required fields, duplicate ids, resolvable
//! dependencies and cycle detection over the dependency graph.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One problem found while validating a feature batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingField {
        feature_id: Option<String>,
        field: String,
        message: String,
    },
    DuplicateId {
        feature_id: String,
        message: String,
    },
    InvalidDependency {
        feature_id: String,
        dependency_id: String,
        message: String,
    },
    DependencyCycle {
        cycle_nodes: Vec<String>,
        message: String,
    },
}

impl ValidationIssue {
    pub fn missing_field(feature_id: Option<&str>, field: &str) -> Self {
        let message = match feature_id {
            Some(id) if !id.is_empty() => format!("Feature {id} is missing required field: {field}"),
            _ => format!("Feature is missing required field: {field}"),
        };
        Self::MissingField {
            feature_id: feature_id.filter(|id| !id.is_empty()).map(str::to_string),
            field: field.to_string(),
            message,
        }
    }

    pub fn duplicate_id(feature_id: &str) -> Self {
        Self::DuplicateId {
            feature_id: feature_id.to_string(),
            message: format!("Duplicate feature ID: {feature_id}"),
        }
    }

    pub fn invalid_dependency(feature_id: &str, dependency_id: &str) -> Self {
        Self::InvalidDependency {
            feature_id: feature_id.to_string(),
            dependency_id: dependency_id.to_string(),
            message: format!("Feature {feature_id} depends on unknown feature {dependency_id}"),
        }
    }

    pub fn dependency_cycle(from: &str, to: &str) -> Self {
        Self::DependencyCycle {
            cycle_nodes: vec![from.to_string(), to.to_string()],
            message: format!("Dependency cycle detected: {from} -> {to}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::InvalidDependency { .. } => "invalid_dependency",
            Self::DependencyCycle { .. } => "dependency_cycle",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::MissingField { message, .. }
            | Self::DuplicateId { message, .. }
            | Self::InvalidDependency { message, .. }
            | Self::DependencyCycle { message, .. } => message,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

/// Outcome of validating a feature batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Directed feature dependency graph. Nodes are visited in insertion order so
/// the reported cycle is deterministic for a given input.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node -> dependency` edges, skipping duplicates
    pub fn add_edges<'a, I>(&mut self, node: &str, dependencies: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        if !self.edges.contains_key(node) {
            self.order.push(node.to_string());
        }
        let targets = self.edges.entry(node.to_string()).or_default();
        for dependency in dependencies {
            if !targets.contains(dependency) {
                targets.push(dependency.clone());
            }
        }
    }

    /// Depth-first search with a recursion stack. Returns the first back-edge
    /// found as `(from, to)`; a self-dependency yields `(node, node)`.
    pub fn find_cycle(&self) -> Option<(String, String)> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let empty: Vec<String> = Vec::new();

        for root in &self.order {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root.as_str(), Mark::Visiting);
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

            while let Some((node, next_index)) = stack.last_mut() {
                let neighbors = self.edges.get(*node).unwrap_or(&empty);
                if *next_index >= neighbors.len() {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                    continue;
                }
                let neighbor = neighbors[*next_index].as_str();
                *next_index += 1;

                match marks.get(neighbor).copied() {
                    Some(Mark::Visiting) => return Some(((*node).to_string(), neighbor.to_string())),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(neighbor, Mark::Visiting);
                        stack.push((neighbor, 0));
                    }
                }
            }
        }
        None
    }
}
