//! Kahn-style layering into parallel execution waves

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphError;
use crate::models::graph::Adjacency;
use crate::models::Graph;

use super::validator::cycle::find_cycle_among;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layering {
    /// Layer k holds the nodes dispatchable in wave k, sorted by id
    pub layers: Vec<Vec<String>>,
    /// Node id -> layer number
    pub assignment: BTreeMap<String, usize>,
    /// Size of the largest layer
    pub max_parallelism: usize,
}

impl Layering {
    pub fn layer_of(&self, node_id: &str) -> Option<usize> {
        self.assignment.get(node_id).copied()
    }
}

/// Assign every node to a layer.
///
/// Layer 0 holds the nodes with no incoming edge; a node joins layer k+1 once
/// its last predecessor has been removed with layer k. Nodes left over when
/// no progress is possible sit on or behind a cycle, which is reported as a
/// `GraphError::Cycle` with a concrete path.
pub fn layer(graph: &Graph) -> Result<Layering, GraphError> {
    layer_adjacency(&graph.adjacency())
}

pub fn layer_adjacency(adj: &Adjacency) -> Result<Layering, GraphError> {
    let mut in_degree: BTreeMap<&str, usize> = adj
        .predecessors
        .iter()
        .map(|(id, preds)| (id.as_str(), preds.len()))
        .collect();

    let mut current: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.to_string())
        .collect();

    let mut layering = Layering::default();

    while !current.is_empty() {
        let depth = layering.layers.len();
        let mut next = BTreeSet::new();

        for id in &current {
            layering.assignment.insert(id.clone(), depth);
            for succ in adj.successors(id) {
                if let Some(degree) = in_degree.get_mut(succ.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(succ.clone());
                    }
                }
            }
        }

        layering.max_parallelism = layering.max_parallelism.max(current.len());
        layering.layers.push(current);
        current = next.into_iter().collect();
    }

    if layering.assignment.len() != adj.successors.len() {
        let residue: BTreeSet<String> = adj
            .successors
            .keys()
            .filter(|id| !layering.assignment.contains_key(*id))
            .cloned()
            .collect();
        let path = find_cycle_among(adj, &residue)
            .unwrap_or_else(|| residue.into_iter().collect());
        return Err(GraphError::Cycle { path });
    }

    Ok(layering)
}
