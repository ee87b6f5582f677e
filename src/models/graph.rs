//! Graph/IR document: the planned workflow as nodes, port-level edges and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::task::{Category, PortSpec, TaskSpec};

/// IR document format version
pub const IR_VERSION: u32 = 1;

/// Output port every built node carries for pure ordering edges
pub const CONTROL_OUTPUT: &str = "done";

/// Input port every built node carries for pure ordering edges
pub const CONTROL_INPUT: &str = "trigger";

/// Positional layout hint (column = layer, row = index within layer)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// A node in the workflow graph, owned by the graph that contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable id in `name@version` form
    pub id: String,
    #[serde(rename = "kind")]
    pub category: Category,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    /// Estimated duration in minutes
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub cost: u64,
    #[serde(default = "default_critical")]
    pub critical: bool,
    #[serde(default)]
    pub position: Position,
}

fn default_critical() -> bool {
    true
}

impl GraphNode {
    /// Create a node from a task spec, adding the control ports.
    pub fn from_task(task: &TaskSpec) -> Self {
        let mut inputs = task.inputs.clone();
        if !inputs.iter().any(|p| p.name == CONTROL_INPUT) {
            inputs.push(PortSpec::optional(CONTROL_INPUT));
        }
        let mut outputs = task.outputs.clone();
        if !outputs.iter().any(|p| p.name == CONTROL_OUTPUT) {
            outputs.push(PortSpec::optional(CONTROL_OUTPUT));
        }

        Self {
            id: task.id(),
            category: task.category,
            summary: task.summary.clone(),
            inputs,
            outputs,
            duration: task.estimated_duration,
            cost: task.estimated_cost,
            critical: task.critical,
            position: Position::default(),
        }
    }

    /// Bare node with only control ports, mostly useful for hand-built graphs.
    pub fn new(id: &str, category: Category, duration: u64) -> Self {
        Self {
            id: id.to_string(),
            category,
            summary: String::new(),
            inputs: vec![PortSpec::optional(CONTROL_INPUT)],
            outputs: vec![PortSpec::optional(CONTROL_OUTPUT)],
            duration,
            cost: 0,
            critical: true,
            position: Position::default(),
        }
    }

    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|p| p.name == port)
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|p| p.name == port)
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: String,
    pub port: String,
}

/// Directed edge `(source, source_port) -> (target, target_port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: PortRef,
    pub to: PortRef,
}

impl GraphEdge {
    pub fn new(source: &str, source_port: &str, target: &str, target_port: &str) -> Self {
        Self {
            from: PortRef {
                node: source.to_string(),
                port: source_port.to_string(),
            },
            to: PortRef {
                node: target.to_string(),
                port: target_port.to_string(),
            },
        }
    }

    /// Pure ordering edge between the control ports of two nodes.
    pub fn control(source: &str, target: &str) -> Self {
        Self::new(source, CONTROL_OUTPUT, target, CONTROL_INPUT)
    }

    pub fn is_control(&self) -> bool {
        self.from.port == CONTROL_OUTPUT && self.to.port == CONTROL_INPUT
    }

    /// Sort key `(source, source_port, target, target_port)`.
    pub fn sort_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.from.node,
            &self.from.port,
            &self.to.node,
            &self.to.port,
        )
    }
}

impl fmt::Display for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from.node, self.from.port, self.to.node, self.to.port
        )
    }
}

/// Non-semantic graph metadata. Never part of the content hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The workflow graph. Logically a set of nodes and edges; the vector order
/// only matters for human-facing layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

fn default_version() -> u32 {
    IR_VERSION
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            version: IR_VERSION,
            nodes: Vec::new(),
            edges: Vec::new(),
            metadata: GraphMetadata::default(),
        }
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    /// Add an edge unless an identical one is already present.
    pub fn add_edge(&mut self, edge: GraphEdge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Node-level adjacency, ignoring edges whose endpoints are missing.
    pub fn adjacency(&self) -> Adjacency {
        Adjacency::from_graph(self)
    }
}

/// Node-level view of a graph: parallel port edges collapse to one arc.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    pub successors: BTreeMap<String, BTreeSet<String>>,
    pub predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl Adjacency {
    pub fn from_graph(graph: &Graph) -> Self {
        Self::from_edges(
            graph.nodes.iter().map(|n| n.id.as_str()),
            graph
                .edges
                .iter()
                .map(|e| (e.from.node.as_str(), e.to.node.as_str())),
        )
    }

    pub fn from_edges<'a>(
        nodes: impl IntoIterator<Item = &'a str>,
        arcs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut adj = Self::default();
        for id in nodes {
            adj.successors.entry(id.to_string()).or_default();
            adj.predecessors.entry(id.to_string()).or_default();
        }
        for (from, to) in arcs {
            if !adj.successors.contains_key(from) || !adj.successors.contains_key(to) {
                continue;
            }
            adj.successors
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string());
            adj.predecessors
                .entry(to.to_string())
                .or_default()
                .insert(from.to_string());
        }
        adj
    }

    pub fn successors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.successors.get(id).into_iter().flatten()
    }

    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.predecessors.get(id).into_iter().flatten()
    }

    /// All nodes reachable from `start` (excluding `start` unless on a cycle).
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.successors(start).map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if seen.insert(id.to_string()) {
                stack.extend(self.successors(id).map(String::as_str));
            }
        }
        seen
    }
}
