//! Cycle detection by depth-first traversal with a recursion stack

use std::collections::BTreeSet;

use crate::models::graph::Adjacency;

/// Find the cycles closed by DFS back edges.
///
/// Roots and successors are visited in id order, so the result is
/// deterministic. Each cycle starts and ends on the same node id.
pub fn find_cycles(adj: &Adjacency) -> Vec<Vec<String>> {
    let mut visited = BTreeSet::new();
    let mut cycles = Vec::new();

    for node_id in adj.successors.keys() {
        if !visited.contains(node_id.as_str()) {
            dfs(adj, node_id, &mut visited, &mut cycles);
        }
    }

    cycles
}

/// First cycle among `nodes`, considering only arcs between them.
pub fn find_cycle_among(adj: &Adjacency, nodes: &BTreeSet<String>) -> Option<Vec<String>> {
    let arcs = adj.successors.iter().flat_map(|(from, tos)| {
        tos.iter()
            .filter(move |to| nodes.contains(from) && nodes.contains(*to))
            .map(move |to| (from.as_str(), to.as_str()))
    });
    let sub = Adjacency::from_edges(nodes.iter().map(String::as_str), arcs);
    find_cycles(&sub).into_iter().next()
}

/// Depth-first walk from `root` with an explicit frame stack, so chain
/// length is not bounded by the thread stack.
fn dfs<'a>(
    adj: &'a Adjacency,
    root: &'a str,
    visited: &mut BTreeSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    let mut rec_stack: BTreeSet<&str> = BTreeSet::new();
    let mut path: Vec<&str> = vec![root];
    let mut frames = vec![adj.successors(root)];
    visited.insert(root);
    rec_stack.insert(root);

    while let Some(frame) = frames.last_mut() {
        match frame.next() {
            Some(next) if !visited.contains(next.as_str()) => {
                visited.insert(next);
                rec_stack.insert(next);
                path.push(next);
                frames.push(adj.successors(next));
            }
            Some(next) => {
                if rec_stack.contains(next.as_str()) {
                    // Back edge: the cycle is the stack suffix starting at `next`
                    let start = path.iter().rposition(|p| *p == next.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(next.clone());
                    cycles.push(cycle);
                }
            }
            None => {
                frames.pop();
                if let Some(done) = path.pop() {
                    rec_stack.remove(done);
                }
            }
        }
    }
}
