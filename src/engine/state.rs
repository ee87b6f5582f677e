//! Node states, the transition table, and the per-execution state map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, NodeFailure};
use crate::models::graph::Adjacency;
use crate::models::Graph;

use super::hooks::StopOutput;

/// Lifecycle of a node within one execution.
///
/// State machine transitions:
/// - `Pending` -> `Running` (all dependencies completed and a slot is free)
/// - `Pending` -> `Failed` (execution cancelled)
/// - `Running` -> `Completed` (success hook)
/// - `Running` -> `Pending` (error hook, retry budget remains)
/// - `Running` -> `Failed` (retry budget exhausted, or cancelled)
/// - `Running` -> `Reviewing` (checkpoint hook)
/// - `Reviewing` -> `Running` (approved, resume)
/// - `Reviewing` -> `Completed` (accepted as done)
/// - `Reviewing` -> `Pending` (rejected, retry with feedback)
/// - `Reviewing` -> `Failed` (review rounds exhausted, or cancelled)
/// - `Completed` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
    Reviewing,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => write!(f, "pending"),
            NodeState::Running => write!(f, "running"),
            NodeState::Completed => write!(f, "completed"),
            NodeState::Failed => write!(f, "failed"),
            NodeState::Reviewing => write!(f, "reviewing"),
        }
    }
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed)
    }

    /// Running or suspended in review; either way the node holds a slot.
    pub fn is_active(&self) -> bool {
        matches!(self, NodeState::Running | NodeState::Reviewing)
    }

    pub fn can_transition_to(&self, new_state: &NodeState) -> bool {
        match self {
            NodeState::Pending => matches!(new_state, NodeState::Running | NodeState::Failed),
            NodeState::Running => matches!(
                new_state,
                NodeState::Completed | NodeState::Pending | NodeState::Failed | NodeState::Reviewing
            ),
            NodeState::Reviewing => matches!(
                new_state,
                NodeState::Running | NodeState::Completed | NodeState::Pending | NodeState::Failed
            ),
            NodeState::Completed => false, // Terminal state
            NodeState::Failed => false,    // Terminal state
        }
    }

    pub fn valid_transitions(&self) -> Vec<NodeState> {
        match self {
            NodeState::Pending => vec![NodeState::Running, NodeState::Failed],
            NodeState::Running => vec![
                NodeState::Completed,
                NodeState::Pending,
                NodeState::Failed,
                NodeState::Reviewing,
            ],
            NodeState::Reviewing => vec![
                NodeState::Running,
                NodeState::Completed,
                NodeState::Pending,
                NodeState::Failed,
            ],
            NodeState::Completed => vec![],
            NodeState::Failed => vec![],
        }
    }
}

/// Informational hook recorded against a running node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub at: DateTime<Utc>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything the engine tracks for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub state: NodeState,
    /// Execution errors since the last completion
    pub error_count: u32,
    /// Review rejections, counted separately from execution errors
    pub review_rounds: u32,
    pub dispatch_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Earliest instant a pending node may be redispatched (retry backoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// Timeout deadline of the current run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Timestamp of the latest stop, error or checkpoint hook applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_hook_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<NodeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<NodeFailure>,
    /// Accumulated review feedback, handed to every later dispatch
    #[serde(default)]
    pub feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StopOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub activity: Vec<Activity>,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            state: NodeState::Pending,
            error_count: 0,
            review_rounds: 0,
            dispatch_count: 0,
            session_id: None,
            not_before: None,
            deadline: None,
            started_at: None,
            finished_at: None,
            last_hook_at: None,
            last_error: None,
            failure: None,
            feedback: Vec::new(),
            output: None,
            review_payload: None,
            activity: Vec::new(),
        }
    }
}

impl NodeRecord {
    /// Validate and apply a state change.
    pub fn try_transition(&mut self, node_id: &str, new_state: NodeState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(&new_state) {
            return Err(EngineError::IllegalTransition {
                node: node_id.to_string(),
                from: self.state,
                to: new_state,
            });
        }
        self.state = new_state;
        Ok(())
    }
}

/// Static shape of the graph an execution runs over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub predecessors: BTreeMap<String, BTreeSet<String>>,
    pub successors: BTreeMap<String, BTreeSet<String>>,
    pub critical: BTreeMap<String, bool>,
}

impl Topology {
    pub fn from_graph(graph: &Graph) -> Self {
        let Adjacency {
            successors,
            predecessors,
        } = graph.adjacency();
        Self {
            predecessors,
            successors,
            critical: graph
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.critical))
                .collect(),
        }
    }

    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &String> {
        self.predecessors.get(id).into_iter().flatten()
    }

    pub fn is_critical(&self, id: &str) -> bool {
        self.critical.get(id).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-run aggregate: the node-state map plus the graph it runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    /// Content hash of the executed graph
    pub graph_hash: String,
    pub topology: Topology,
    pub nodes: BTreeMap<String, NodeRecord>,
}

impl ExecutionState {
    pub fn new(graph: &Graph, graph_hash: String) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            graph_hash,
            topology: Topology::from_graph(graph),
            nodes: graph
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeRecord::default()))
                .collect(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<NodeState> {
        self.nodes.get(id).map(|r| r.state)
    }

    /// Every predecessor of `id` has completed.
    pub fn dependencies_completed(&self, id: &str) -> bool {
        self.first_incomplete_dependency(id).is_none()
    }

    pub fn first_incomplete_dependency(&self, id: &str) -> Option<&String> {
        self.topology
            .predecessors(id)
            .find(|p| self.state_of(p) != Some(NodeState::Completed))
    }

    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|r| r.state.is_active()).count()
    }

    /// Overall status, derived from the node map alone.
    pub fn status(&self) -> ExecutionStatus {
        if self.nodes.values().all(|r| r.state == NodeState::Completed) {
            return ExecutionStatus::Completed;
        }

        let progress_possible = self.nodes.iter().any(|(id, r)| {
            r.state.is_active()
                || (r.state == NodeState::Pending && self.dependencies_completed(id))
        });
        if progress_possible {
            return ExecutionStatus::Running;
        }

        let tolerable = self.nodes.iter().all(|(id, r)| {
            r.state == NodeState::Completed
                || (!self.topology.is_critical(id) && r.failure != Some(NodeFailure::Cancelled))
        });
        if tolerable {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        }
    }

    pub fn summary(&self) -> StatusSummary {
        summarize(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub reviewing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub state: NodeState,
    pub error_count: u32,
    pub review_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<NodeFailure>,
}

/// Serializable status snapshot for external observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub execution_id: Uuid,
    pub graph_hash: String,
    pub status: ExecutionStatus,
    pub counts: StateCounts,
    pub cancelled: bool,
    pub nodes: BTreeMap<String, NodeSummary>,
}

/// Pure function from execution state to its summary.
pub fn summarize(state: &ExecutionState) -> StatusSummary {
    let mut counts = StateCounts::default();
    for record in state.nodes.values() {
        match record.state {
            NodeState::Pending => counts.pending += 1,
            NodeState::Running => counts.running += 1,
            NodeState::Completed => counts.completed += 1,
            NodeState::Failed => counts.failed += 1,
            NodeState::Reviewing => counts.reviewing += 1,
        }
    }

    StatusSummary {
        execution_id: state.execution_id,
        graph_hash: state.graph_hash.clone(),
        status: state.status(),
        counts,
        cancelled: state
            .nodes
            .values()
            .any(|r| r.failure == Some(NodeFailure::Cancelled)),
        nodes: state
            .nodes
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    NodeSummary {
                        state: r.state,
                        error_count: r.error_count,
                        review_rounds: r.review_rounds,
                        failure: r.failure.clone(),
                    },
                )
            })
            .collect(),
    }
}
