//! Longest time-weighted path through the graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::graph::Adjacency;
use crate::models::Graph;

use super::layering::Layering;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Root-to-leaf node ids
    pub path: Vec<String>,
    /// Sum of durations along `path`; minimum makespan under unlimited parallelism
    pub total: u64,
    /// `duration(n) + max(earliest_finish(p))` over predecessors `p`
    pub earliest_finish: BTreeMap<String, u64>,
}

/// Compute the critical path over a layered graph.
///
/// Ties are broken by the smallest node id, both when choosing the end node
/// and when choosing the predecessor to backtrack through.
pub fn analyze(graph: &Graph, layering: &Layering) -> CriticalPath {
    let adj = graph.adjacency();
    let durations: BTreeMap<&str, u64> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.duration))
        .collect();
    analyze_weighted(&adj, layering, |id| durations.get(id).copied().unwrap_or(0))
}

pub fn analyze_weighted(
    adj: &Adjacency,
    layering: &Layering,
    duration: impl Fn(&str) -> u64,
) -> CriticalPath {
    let mut earliest_finish: BTreeMap<String, u64> = BTreeMap::new();
    let mut best_pred: BTreeMap<&str, Option<&str>> = BTreeMap::new();

    for id in layering.layers.iter().flatten() {
        // Predecessors iterate in id order, so `>` keeps the smallest id on ties
        let mut best: Option<(&str, u64)> = None;
        for pred in adj.predecessors(id) {
            let finish = earliest_finish.get(pred).copied().unwrap_or(0);
            if best.map_or(true, |(_, b)| finish > b) {
                best = Some((pred.as_str(), finish));
            }
        }

        let start = best.map(|(_, f)| f).unwrap_or(0);
        earliest_finish.insert(id.clone(), start.saturating_add(duration(id)));
        best_pred.insert(id.as_str(), best.map(|(p, _)| p));
    }

    let mut end: Option<(&str, u64)> = None;
    for (id, finish) in &earliest_finish {
        if end.map_or(true, |(_, b)| *finish > b) {
            end = Some((id.as_str(), *finish));
        }
    }

    let Some((end_id, total)) = end else {
        return CriticalPath::default();
    };

    let mut path = vec![end_id.to_string()];
    let mut cursor = end_id;
    while let Some(Some(pred)) = best_pred.get(cursor) {
        path.push(pred.to_string());
        cursor = *pred;
    }
    path.reverse();

    CriticalPath {
        path,
        total,
        earliest_finish,
    }
}
