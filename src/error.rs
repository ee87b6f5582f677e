//! Error types for planning and execution.
//!
//! Every variant carries the node id, edge or cycle path needed to locate
//! the problem in the graph.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::NodeState;
use crate::models::{Category, GraphEdge};

/// Graph construction failed; no graph is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A required input has no compatible producer earlier in the selection.
    #[error("no producer for required input '{port}' of node '{node}'")]
    MissingProducer { node: String, port: String },

    /// The selection names a task the store does not know.
    #[error("unknown task '{name}'")]
    UnknownTask { name: String },

    #[error("invalid task '{name}': {reason}")]
    InvalidTask { name: String, reason: String },
}

/// Why an edge endpoint does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DanglingEnd {
    MissingNode { node: String },
    MissingOutputPort { node: String, port: String },
    MissingInputPort { node: String, port: String },
}

impl std::fmt::Display for DanglingEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DanglingEnd::MissingNode { node } => write!(f, "node '{node}' does not exist"),
            DanglingEnd::MissingOutputPort { node, port } => {
                write!(f, "node '{node}' has no output port '{port}'")
            }
            DanglingEnd::MissingInputPort { node, port } => {
                write!(f, "node '{node}' has no input port '{port}'")
            }
        }
    }
}

/// Fatal graph validity errors. A graph carrying any of these must not be
/// executed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "kebab-case")]
pub enum GraphError {
    #[error("structural error: node id '{id}' appears {count} times")]
    Structural { id: String, count: usize },

    #[error("dangling edge {edge}: {end}")]
    DanglingEdge { edge: GraphEdge, end: DanglingEnd },

    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Non-fatal: an edge runs from a later-stage category into an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingWarning {
    pub from: String,
    pub to: String,
    pub from_category: Category,
    pub to_category: Category,
}

impl std::fmt::Display for OrderingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ordering: {} ({}) runs before {} ({})",
            self.from, self.from_category, self.to, self.to_category
        )
    }
}

/// Planning pipeline failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("graph is invalid: {}", summarize(.0))]
    Invalid(Vec<GraphError>),
}

fn summarize(errors: &[GraphError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a node failed, recorded on the node rather than propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeFailure {
    /// Error reported by the agent through a hook
    #[error("execution error: {message}")]
    Execution { message: String },

    #[error("timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    /// Terminal: the retry budget is spent
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<NodeFailure> },

    /// Terminal: more review rejections than allowed
    #[error("review rejected {rounds} times")]
    ReviewRejected { rounds: u32 },

    #[error("execution cancelled")]
    Cancelled,
}

/// Engine-level errors. State is left unchanged whenever one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("illegal transition for node '{node}': {from} -> {to}")]
    IllegalTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    #[error("event '{event}' is not accepted by node '{node}' in state {state}")]
    UnexpectedEvent {
        node: String,
        state: NodeState,
        event: String,
    },

    /// Dispatch attempted before every predecessor completed. Never expected.
    #[error("dispatch of '{node}' attempted while '{blocking}' is not completed")]
    Dispatch { node: String, blocking: String },

    #[error("cannot execute an invalid graph: {}", summarize(.0))]
    InvalidGraph(Vec<GraphError>),
}
