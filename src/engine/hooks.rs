//! Hook events reported by the external agent runtime, and review decisions.
//!
//! Delivery is at-least-once and may be out of order. The engine treats a
//! duplicate or stale event as a no-op, never as an error.
//!
//! Wire shape:
//! ```json
//! {"event": "stop", "nodeId": "build@1.0.0", "timestamp": "...", "sessionId": "...",
//!  "status": "success", "output": {"data": {}, "metrics": {}},
//!  "next": {"action": "continue"}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A single lifecycle event for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    /// Dispatch session the event belongs to; events from an older session are stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: HookKind,
}

impl Hook {
    pub fn new(node_id: &str, session_id: Option<Uuid>, kind: HookKind) -> Self {
        Self {
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            session_id,
            kind,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn success(node_id: &str, session_id: Option<Uuid>) -> Self {
        Self::new(
            node_id,
            session_id,
            HookKind::Stop {
                status: StopStatus::Success,
                output: None,
                next: None,
                error: None,
            },
        )
    }

    pub fn error(node_id: &str, session_id: Option<Uuid>, message: &str) -> Self {
        Self::new(
            node_id,
            session_id,
            HookKind::Error {
                message: message.to_string(),
            },
        )
    }

    pub fn checkpoint(node_id: &str, session_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self::new(node_id, session_id, HookKind::Checkpoint { payload })
    }
}

/// Closed set of hook event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HookKind {
    Start,
    Stop {
        status: StopStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<StopOutput>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<NextAction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    Checkpoint {
        #[serde(default)]
        payload: serde_json::Value,
    },
    FileChange {
        path: String,
    },
    SubagentComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    TestResults {
        passed: u32,
        failed: u32,
    },
}

impl HookKind {
    pub fn name(&self) -> &'static str {
        match self {
            HookKind::Start => "start",
            HookKind::Stop { .. } => "stop",
            HookKind::Error { .. } => "error",
            HookKind::Checkpoint { .. } => "checkpoint",
            HookKind::FileChange { .. } => "file-change",
            HookKind::SubagentComplete { .. } => "subagent-complete",
            HookKind::TestResults { .. } => "test-results",
        }
    }

    /// Events that only add to a running node's activity log.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            HookKind::Start
                | HookKind::FileChange { .. }
                | HookKind::SubagentComplete { .. }
                | HookKind::TestResults { .. }
        )
    }

    /// Short description kept in the activity log.
    pub fn detail(&self) -> Option<String> {
        match self {
            HookKind::FileChange { path } => Some(path.clone()),
            HookKind::SubagentComplete { agent, summary } => match (agent, summary) {
                (Some(a), Some(s)) => Some(format!("{a}: {s}")),
                (Some(a), None) => Some(a.clone()),
                (None, s) => s.clone(),
            },
            HookKind::TestResults { passed, failed } => {
                Some(format!("{passed} passed, {failed} failed"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopOutput {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextActionKind {
    #[default]
    Continue,
    Retry,
    Review,
}

/// Agent's suggestion for what happens next. Retry counters reported here
/// are informational; the engine's own counters and policy decide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAction {
    #[serde(default)]
    pub action: NextActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// External decision on a node suspended in review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ReviewDecision {
    /// Resume the same run
    Approve,
    /// Accept the work as done
    Accept,
    /// Send the node back to pending with feedback for its next attempt
    Reject { feedback: String },
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewDecision::Approve => write!(f, "approve"),
            ReviewDecision::Accept => write!(f, "accept"),
            ReviewDecision::Reject { .. } => write!(f, "reject"),
        }
    }
}
