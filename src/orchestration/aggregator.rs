//! # Result Aggregation
//!
//! Combines per-feature artifacts into one output: a generated header, a
//! single sorted block of the declaration lines (imports) found across all
//! features, then each feature's remaining content under its own heading.

use crate::orchestration::types::FeatureOutput;
use chrono::Utc;
use std::collections::BTreeSet;

const DECLARATION_PREFIXES: [&str; 4] = ["import ", "from ", "use ", "#include "];

/// Whether a line is a top-level declaration that is hoisted and deduplicated
pub fn is_declaration_line(line: &str) -> bool {
    DECLARATION_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Builds the combined artifact. Features without an implementation are skipped.
pub fn aggregate_implementations(component_id: &str, features: &[FeatureOutput]) -> String {
    let with_content: Vec<(&FeatureOutput, &str)> = features
        .iter()
        .filter_map(|feature| {
            feature
                .implementation
                .as_deref()
                .map(|implementation| (feature, implementation))
        })
        .collect();

    let mut declarations: BTreeSet<&str> = BTreeSet::new();
    let mut blocks: Vec<String> = Vec::with_capacity(with_content.len());

    for (feature, implementation) in &with_content {
        let mut body: Vec<&str> = Vec::new();
        for line in implementation.lines() {
            if is_declaration_line(line) {
                declarations.insert(line.trim_end());
            } else {
                body.push(line);
            }
        }
        let body = body.join("\n");
        blocks.push(format!(
            "# Feature: {} ({})\n{}",
            feature.feature_name,
            feature.feature_id,
            body.trim_matches('\n')
        ));
    }

    let mut output = format!(
        "# Component: {component_id}\n\
         # Generated by delegation-core\n\
         # Timestamp: {}\n\
         # Features: {}\n",
        Utc::now().to_rfc3339(),
        with_content.len()
    );

    if !declarations.is_empty() {
        output.push_str("\n# Imports\n");
        for declaration in &declarations {
            output.push_str(declaration);
            output.push('\n');
        }
    }

    for block in blocks {
        output.push('\n');
        output.push_str(&block);
        output.push('\n');
    }
    output
}
