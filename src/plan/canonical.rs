//! Canonical form and content hash of a graph.
//!
//! Two graphs holding the same nodes and edges hash identically no matter
//! the order they were built in. Summaries, layout and metadata are not
//! part of the identity.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::{Category, Graph, GraphEdge, PortSpec};

/// Version tag mixed into the hashed encoding
pub const CANONICAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalPort {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalNode {
    pub id: String,
    pub kind: Category,
    pub inputs: Vec<CanonicalPort>,
    pub outputs: Vec<CanonicalPort>,
    pub duration: u64,
    pub cost: u64,
    pub critical: bool,
}

/// Normalised graph: nodes sorted by id, ports by name, edges by
/// `(source, source_port, target, target_port)` with duplicates removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalForm {
    pub version: u32,
    pub nodes: Vec<CanonicalNode>,
    pub edges: Vec<GraphEdge>,
}

impl CanonicalForm {
    /// Fixed, unambiguous encoding used for hashing.
    pub fn encode(&self) -> Vec<u8> {
        // Only strings, integers, bools and sequences: serialisation cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// SHA-256 of the encoding as lowercase hex.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        hex::encode(hasher.finalize())
    }
}

fn canonical_ports(ports: &[PortSpec]) -> Vec<CanonicalPort> {
    let mut out: Vec<CanonicalPort> = ports
        .iter()
        .map(|p| CanonicalPort {
            name: p.name.clone(),
            ty: p.ty.clone(),
            required: p.required,
        })
        .collect();
    out.sort_by(|a, b| (&a.name, &a.ty, a.required).cmp(&(&b.name, &b.ty, b.required)));
    out
}

/// Build the canonical form of a graph.
pub fn normalize(graph: &Graph) -> CanonicalForm {
    let mut nodes: Vec<CanonicalNode> = graph
        .nodes
        .iter()
        .map(|n| CanonicalNode {
            id: n.id.clone(),
            kind: n.category,
            inputs: canonical_ports(&n.inputs),
            outputs: canonical_ports(&n.outputs),
            duration: n.duration,
            cost: n.cost,
            critical: n.critical,
        })
        .collect();
    // Ties on id (duplicate nodes) fall back to the full encoding so the
    // order is still independent of insertion.
    nodes.sort_by(|a, b| {
        a.id.cmp(&b.id).then_with(|| {
            serde_json::to_string(a)
                .unwrap_or_default()
                .cmp(&serde_json::to_string(b).unwrap_or_default())
        })
    });

    let mut edges = graph.edges.clone();
    edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    edges.dedup();

    CanonicalForm {
        version: CANONICAL_VERSION,
        nodes,
        edges,
    }
}

/// Content hash of a graph: `hash(normalize(graph))`.
pub fn content_hash(graph: &Graph) -> String {
    normalize(graph).hash()
}

/// Rewrite the graph in canonical order (nodes by id, edges by key) while
/// keeping every non-semantic field.
pub fn sort_in_place(graph: &mut Graph) {
    graph.nodes.sort_by(|a, b| a.id.cmp(&b.id));
    for node in &mut graph.nodes {
        node.inputs.sort_by(|a, b| a.name.cmp(&b.name));
        node.outputs.sort_by(|a, b| a.name.cmp(&b.name));
    }
    graph.edges.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    graph.edges.dedup();
}
