//! Removal of transitively implied ordering edges.
//!
//! Only control edges (`done -> trigger`) are candidates. A data edge binds a
//! port the target consumes, so it is kept even when another path exists.

use std::collections::HashSet;
use tracing::debug;

use crate::models::graph::Adjacency;
use crate::models::{Graph, GraphEdge};

/// Drop redundant edges in place and return the removed ones.
///
/// A control edge `a -> b` is redundant when `b` is still reachable from `a`
/// without it. Candidates are checked in canonical edge order against the
/// current graph, one removal at a time, so reachability never changes and
/// running the pass twice removes nothing the second time.
pub fn optimize(graph: &mut Graph) -> Vec<GraphEdge> {
    let mut removed = Vec::new();

    let mut seen = HashSet::new();
    graph.edges.retain(|edge| {
        let first = seen.insert(edge.clone());
        if !first {
            removed.push(edge.clone());
        }
        first
    });

    let mut candidates: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| e.is_control())
        .cloned()
        .collect();
    candidates.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    for candidate in candidates {
        let adj = Adjacency::from_edges(
            graph.nodes.iter().map(|n| n.id.as_str()),
            graph
                .edges
                .iter()
                .filter(|e| **e != candidate)
                .map(|e| (e.from.node.as_str(), e.to.node.as_str())),
        );

        if adj
            .reachable_from(&candidate.from.node)
            .contains(&candidate.to.node)
        {
            debug!(edge = %candidate, "dropping transitively implied edge");
            graph.edges.retain(|e| *e != candidate);
            removed.push(candidate);
        }
    }

    removed
}
