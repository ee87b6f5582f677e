//! Structural validation of a built or edited graph.
//!
//! Checks run in order and stop after the first category that produced
//! errors, but every error within that category is collected:
//! 1. duplicate node ids
//! 2. dangling edges (missing node or port)
//! 3. cycles
//! 4. category ordering (warnings only, never blocking)

pub mod cycle;


use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::{DanglingEnd, GraphError, OrderingWarning};
use crate::models::Graph;

/// Validation outcome: `errors` block use of the graph, `warnings` are advisory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<GraphError>,
    pub warnings: Vec<OrderingWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Result`, keeping warnings on success.
    pub fn into_result(self) -> Result<Vec<OrderingWarning>, Vec<GraphError>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(self.errors)
        }
    }
}

/// Validate a graph.
pub fn validate(graph: &Graph) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.errors = check_duplicates(graph);
    if !report.errors.is_empty() {
        return finish(report);
    }

    report.errors = check_dangling(graph);
    if !report.errors.is_empty() {
        return finish(report);
    }

    report.errors = check_cycles(graph);
    if !report.errors.is_empty() {
        return finish(report);
    }

    report.warnings = check_ordering(graph);
    finish(report)
}

fn finish(report: ValidationReport) -> ValidationReport {
    for error in &report.errors {
        warn!(%error, "graph validation error");
    }
    for warning in &report.warnings {
        debug!(%warning, "graph ordering warning");
    }
    report
}

fn check_duplicates(graph: &Graph) -> Vec<GraphError> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for node in &graph.nodes {
        *counts.entry(node.id.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, count)| GraphError::Structural {
            id: id.to_string(),
            count,
        })
        .collect()
}

fn check_dangling(graph: &Graph) -> Vec<GraphError> {
    let mut errors = Vec::new();

    for edge in &graph.edges {
        let source_end = match graph.node(&edge.from.node) {
            None => Some(DanglingEnd::MissingNode {
                node: edge.from.node.clone(),
            }),
            Some(node) if !node.has_output(&edge.from.port) => {
                Some(DanglingEnd::MissingOutputPort {
                    node: edge.from.node.clone(),
                    port: edge.from.port.clone(),
                })
            }
            Some(_) => None,
        };
        let target_end = match graph.node(&edge.to.node) {
            None => Some(DanglingEnd::MissingNode {
                node: edge.to.node.clone(),
            }),
            Some(node) if !node.has_input(&edge.to.port) => Some(DanglingEnd::MissingInputPort {
                node: edge.to.node.clone(),
                port: edge.to.port.clone(),
            }),
            Some(_) => None,
        };

        for end in [source_end, target_end].into_iter().flatten() {
            errors.push(GraphError::DanglingEdge {
                edge: edge.clone(),
                end,
            });
        }
    }

    errors
}

fn check_cycles(graph: &Graph) -> Vec<GraphError> {
    cycle::find_cycles(&graph.adjacency())
        .into_iter()
        .map(|path| GraphError::Cycle { path })
        .collect()
}

fn check_ordering(graph: &Graph) -> Vec<OrderingWarning> {
    let mut seen = BTreeSet::new();
    let mut warnings = Vec::new();

    for edge in &graph.edges {
        let (Some(from), Some(to)) = (graph.node(&edge.from.node), graph.node(&edge.to.node)) else {
            continue;
        };
        if from.category.stage() > to.category.stage()
            && seen.insert((from.id.clone(), to.id.clone()))
        {
            warnings.push(OrderingWarning {
                from: from.id.clone(),
                to: to.id.clone(),
                from_category: from.category,
                to_category: to.category,
            });
        }
    }

    warnings
}
