//! Hook-driven execution state machine.
//!
//! The engine is synchronous and does no I/O: every call takes an event,
//! applies it to the node-state map, and returns the effects the caller has
//! to carry out (dispatch an agent, arm a timer, notify observers). Time only
//! enters through event timestamps, so the engine never polls.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineError, NodeFailure};
use crate::models::{Graph, RetryPolicy};
use crate::plan::{canonical, layering, validator};

use super::hooks::{Hook, HookKind, NextActionKind, ReviewDecision, StopOutput, StopStatus};
use super::retry;
use super::state::{Activity, ExecutionState, ExecutionStatus, NodeState, StatusSummary};

/// Input to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    Hook(Hook),
    Review {
        node_id: String,
        decision: ReviewDecision,
        at: DateTime<Utc>,
    },
    /// A retry backoff has elapsed
    RetryDue {
        node_id: String,
        at: DateTime<Utc>,
    },
    /// A run's timeout deadline has passed
    TimeoutElapsed {
        node_id: String,
        session_id: Uuid,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Cancel {
        at: DateTime<Utc>,
    },
}

/// Context handed to the agent runtime with every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchContext {
    /// 1-based count of dispatches of this node, including this one
    pub attempt: u32,
    pub error_count: u32,
    pub review_rounds: u32,
    /// Review feedback accumulated so far
    pub feedback: Vec<String>,
    /// Output data of each completed predecessor
    pub upstream: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub execution_id: Uuid,
    pub node_id: String,
    pub session_id: Uuid,
    pub context: DispatchContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub node_id: String,
    pub from: NodeState,
    pub to: NodeState,
    pub at: DateTime<Utc>,
}

/// Work the caller must carry out, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "kebab-case")]
pub enum Effect {
    StateChanged(StateChange),
    Dispatch(DispatchRequest),
    ScheduleRetry {
        node_id: String,
        at: DateTime<Utc>,
    },
    ArmTimeout {
        node_id: String,
        session_id: Uuid,
        deadline: DateTime<Utc>,
    },
}

/// Why an event left the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IgnoreReason {
    /// Repeats an event whose effect is already applied
    Duplicate,
    /// Belongs to an earlier session or attempt
    Stale,
    /// Node already completed or failed
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Applied,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub disposition: Disposition,
    pub effects: Vec<Effect>,
}

impl Outcome {
    fn applied(effects: Vec<Effect>) -> Self {
        Self {
            disposition: Disposition::Applied,
            effects,
        }
    }

    fn ignored(reason: IgnoreReason) -> Self {
        Self {
            disposition: Disposition::Ignored(reason),
            effects: Vec::new(),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.disposition == Disposition::Applied
    }

    pub fn dispatches(&self) -> impl Iterator<Item = &DispatchRequest> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Dispatch(request) => Some(request),
            _ => None,
        })
    }
}

/// Per-node settings resolved from config at construction.
#[derive(Debug, Clone)]
struct NodeSettings {
    policy: RetryPolicy,
    timeout: Option<std::time::Duration>,
}

pub struct ExecutionEngine {
    state: ExecutionState,
    settings: BTreeMap<String, NodeSettings>,
    max_concurrency: usize,
    max_review_rounds: Option<u32>,
    rng: StdRng,
}

impl ExecutionEngine {
    /// Create an engine over a graph. The graph must validate cleanly;
    /// ordering warnings are tolerated.
    pub fn new(graph: &Graph, config: &Config) -> Result<Self, EngineError> {
        let report = validator::validate(graph);
        if !report.is_valid() {
            return Err(EngineError::InvalidGraph(report.errors));
        }
        layering::layer(graph).map_err(|e| EngineError::InvalidGraph(vec![e]))?;

        let settings = graph
            .nodes
            .iter()
            .map(|node| {
                (
                    node.id.clone(),
                    NodeSettings {
                        policy: config.retry_policy_for(node).clone(),
                        timeout: config.timeout_for(node),
                    },
                )
            })
            .collect();

        let rng = match config.execution.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let state = ExecutionState::new(graph, canonical::content_hash(graph));
        info!(
            execution = %state.execution_id,
            nodes = state.nodes.len(),
            "execution created"
        );

        Ok(Self {
            state,
            settings,
            max_concurrency: config.execution.max_concurrency.max(1),
            max_review_rounds: config.execution.max_review_rounds,
            rng,
        })
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn execution_id(&self) -> Uuid {
        self.state.execution_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.state.status()
    }

    pub fn summary(&self) -> StatusSummary {
        self.state.summary()
    }

    /// Dispatch the initially ready nodes.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<Vec<Effect>, EngineError> {
        self.schedule(at)
    }

    pub fn apply(&mut self, event: EngineEvent) -> Result<Outcome, EngineError> {
        match event {
            EngineEvent::Hook(hook) => self.on_hook(hook),
            EngineEvent::Review {
                node_id,
                decision,
                at,
            } => self.on_review(&node_id, decision, at),
            EngineEvent::RetryDue { node_id, at } => self.on_retry_due(&node_id, at),
            EngineEvent::TimeoutElapsed {
                node_id,
                session_id,
                deadline,
                at,
            } => self.on_timeout(&node_id, session_id, deadline, at),
            EngineEvent::Cancel { at } => self.cancel(at),
        }
    }

    fn on_hook(&mut self, hook: Hook) -> Result<Outcome, EngineError> {
        let node_id = hook.node_id.as_str();
        let at = hook.timestamp;
        let record = self
            .state
            .nodes
            .get(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

        let (state, dispatch_count) = (record.state, record.dispatch_count);

        if state.is_terminal() {
            debug!(node = node_id, event = %hook.kind, %state, "hook for terminal node ignored");
            return Ok(Outcome::ignored(IgnoreReason::Terminal));
        }
        if hook.session_id.is_some() && hook.session_id != record.session_id {
            debug!(node = node_id, event = %hook.kind, "hook from stale session ignored");
            return Ok(Outcome::ignored(IgnoreReason::Stale));
        }
        // Without a session id, only the timestamp ties a hook to a run
        if hook.session_id.is_none() {
            let before_run = record.started_at.is_some_and(|started| at < started);
            let already_seen = !hook.kind.is_informational()
                && record.last_hook_at.is_some_and(|seen| at <= seen);
            if before_run || already_seen {
                debug!(node = node_id, event = %hook.kind, "hook from an earlier run ignored");
                return Ok(Outcome::ignored(IgnoreReason::Stale));
            }
        }

        let outcome = match (state, &hook.kind) {
            (NodeState::Running, kind) if kind.is_informational() => {
                let activity = Activity {
                    at,
                    event: kind.name().to_string(),
                    detail: kind.detail(),
                };
                if let Some(record) = self.state.nodes.get_mut(node_id) {
                    record.activity.push(activity);
                }
                Ok(Outcome::applied(Vec::new()))
            }
            (
                NodeState::Running,
                HookKind::Stop {
                    status: StopStatus::Success,
                    output,
                    next,
                    ..
                },
            ) => {
                let output = output.clone();
                if next.as_ref().map(|n| n.action) == Some(NextActionKind::Review) {
                    let payload = output.as_ref().map(|o| o.data.clone());
                    self.enter_review(node_id, payload, output, at)
                } else {
                    self.complete(node_id, output, at)
                }
            }
            (
                NodeState::Running,
                HookKind::Stop {
                    status: StopStatus::Error,
                    error,
                    ..
                },
            ) => {
                let message = error.clone().unwrap_or_else(|| "agent stopped with error".to_string());
                self.fail_attempt(node_id, NodeFailure::Execution { message }, at)
            }
            (NodeState::Running, HookKind::Error { message }) => {
                let failure = NodeFailure::Execution {
                    message: message.clone(),
                };
                self.fail_attempt(node_id, failure, at)
            }
            (NodeState::Running, HookKind::Checkpoint { payload }) => {
                let payload = Some(payload.clone());
                self.enter_review(node_id, payload, None, at)
            }
            (NodeState::Reviewing, HookKind::Checkpoint { .. })
            | (
                NodeState::Reviewing,
                HookKind::Stop {
                    status: StopStatus::Success,
                    ..
                },
            ) => Ok(Outcome::ignored(IgnoreReason::Duplicate)),
            (NodeState::Reviewing, kind) if kind.is_informational() => {
                Ok(Outcome::ignored(IgnoreReason::Stale))
            }
            // A pending node that already ran is hearing from an earlier attempt
            (NodeState::Pending, _) if dispatch_count > 0 => {
                debug!(node = node_id, event = %hook.kind, "hook for a retried node ignored");
                Ok(Outcome::ignored(IgnoreReason::Stale))
            }
            (state, kind) => Err(EngineError::UnexpectedEvent {
                node: node_id.to_string(),
                state,
                event: kind.name().to_string(),
            }),
        }?;

        if outcome.is_applied() && !hook.kind.is_informational() {
            if let Some(record) = self.state.nodes.get_mut(node_id) {
                record.last_hook_at = Some(at);
            }
        }
        Ok(outcome)
    }

    fn on_review(
        &mut self,
        node_id: &str,
        decision: ReviewDecision,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let state = self
            .state
            .state_of(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

        match state {
            NodeState::Reviewing => {}
            s if s.is_terminal() => return Ok(Outcome::ignored(IgnoreReason::Terminal)),
            s => {
                return Err(EngineError::UnexpectedEvent {
                    node: node_id.to_string(),
                    state: s,
                    event: format!("review:{decision}"),
                })
            }
        }

        info!(node = node_id, %decision, "review decision");
        match decision {
            ReviewDecision::Approve => {
                let mut effects = vec![self.transition(node_id, NodeState::Running, at)?];
                effects.extend(self.arm_timeout(node_id, at));
                Ok(Outcome::applied(effects))
            }
            ReviewDecision::Accept => self.complete(node_id, None, at),
            ReviewDecision::Reject { feedback } => self.reject(node_id, feedback, at),
        }
    }

    fn on_retry_due(&mut self, node_id: &str, at: DateTime<Utc>) -> Result<Outcome, EngineError> {
        let record = self
            .state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

        if record.state != NodeState::Pending {
            return Ok(Outcome::ignored(IgnoreReason::Stale));
        }
        let not_before = record.not_before;
        match not_before {
            None => Ok(Outcome::ignored(IgnoreReason::Duplicate)),
            Some(due) if at < due => Ok(Outcome::ignored(IgnoreReason::Stale)),
            Some(_) => {
                record.not_before = None;
                debug!(node = node_id, "retry backoff elapsed");
                Ok(Outcome::applied(self.schedule(at)?))
            }
        }
    }

    fn on_timeout(
        &mut self,
        node_id: &str,
        session_id: Uuid,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let record = self
            .state
            .nodes
            .get(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;

        let current = record.state == NodeState::Running
            && record.session_id == Some(session_id)
            && record.deadline == Some(deadline);
        if !current {
            return Ok(Outcome::ignored(IgnoreReason::Stale));
        }

        let after_secs = record
            .started_at
            .map(|s| (deadline - s).num_seconds().max(0) as u64)
            .unwrap_or(0);
        warn!(node = node_id, after_secs, "node timed out");
        self.fail_attempt(node_id, NodeFailure::Timeout { after_secs }, at)
    }

    /// Fail every non-terminal node and stop dispatching.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<Outcome, EngineError> {
        let open: Vec<String> = self
            .state
            .nodes
            .iter()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        if open.is_empty() {
            return Ok(Outcome::ignored(IgnoreReason::Duplicate));
        }

        let mut effects = Vec::new();
        for id in open {
            effects.push(self.transition(&id, NodeState::Failed, at)?);
            if let Some(record) = self.state.nodes.get_mut(&id) {
                record.failure = Some(NodeFailure::Cancelled);
                record.not_before = None;
                record.deadline = None;
                record.finished_at = Some(at);
            }
        }
        warn!(execution = %self.state.execution_id, "execution cancelled");
        Ok(Outcome::applied(effects))
    }

    fn complete(
        &mut self,
        node_id: &str,
        output: Option<StopOutput>,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let mut effects = vec![self.transition(node_id, NodeState::Completed, at)?];
        if let Some(record) = self.state.nodes.get_mut(node_id) {
            record.error_count = 0;
            record.deadline = None;
            record.finished_at = Some(at);
            if output.is_some() {
                record.output = output;
            }
        }
        effects.extend(self.schedule(at)?);
        Ok(Outcome::applied(effects))
    }

    fn enter_review(
        &mut self,
        node_id: &str,
        payload: Option<serde_json::Value>,
        output: Option<StopOutput>,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let effect = self.transition(node_id, NodeState::Reviewing, at)?;
        if let Some(record) = self.state.nodes.get_mut(node_id) {
            record.review_payload = payload;
            record.deadline = None;
            if output.is_some() {
                record.output = output;
            }
        }
        Ok(Outcome::applied(vec![effect]))
    }

    /// Error path of a running node: retry while the budget lasts.
    fn fail_attempt(
        &mut self,
        node_id: &str,
        failure: NodeFailure,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let policy = self
            .settings
            .get(node_id)
            .map(|s| s.policy.clone())
            .unwrap_or_default();
        let error_count = self
            .state
            .node(node_id)
            .map(|r| r.error_count + 1)
            .unwrap_or(1);

        if !retry::has_budget(&policy, error_count) {
            let effect = self.transition(node_id, NodeState::Failed, at)?;
            if let Some(record) = self.state.nodes.get_mut(node_id) {
                record.error_count = error_count;
                record.last_error = Some(failure.clone());
                record.failure = Some(NodeFailure::RetryExhausted {
                    attempts: error_count,
                    last: Box::new(failure),
                });
                record.deadline = None;
                record.finished_at = Some(at);
            }
            warn!(node = node_id, attempts = error_count, "retries exhausted");
            let mut effects = vec![effect];
            effects.extend(self.schedule(at)?);
            return Ok(Outcome::applied(effects));
        }

        let delay = retry::delay_with_jitter(&policy, error_count, &mut self.rng);
        let not_before = retry::retry_at(at, delay);

        let mut effects = vec![self.transition(node_id, NodeState::Pending, at)?];
        if let Some(record) = self.state.nodes.get_mut(node_id) {
            record.error_count = error_count;
            record.last_error = Some(failure);
            record.session_id = None;
            record.deadline = None;
            record.not_before = not_before;
        }
        info!(
            node = node_id,
            attempt = error_count,
            max_attempts = policy.max_attempts,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );

        if let Some(due) = not_before {
            effects.push(Effect::ScheduleRetry {
                node_id: node_id.to_string(),
                at: due,
            });
        }
        effects.extend(self.schedule(at)?);
        Ok(Outcome::applied(effects))
    }

    fn reject(
        &mut self,
        node_id: &str,
        feedback: String,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let rounds = self
            .state
            .node(node_id)
            .map(|r| r.review_rounds + 1)
            .unwrap_or(1);
        let exhausted = self.max_review_rounds.is_some_and(|max| rounds > max);
        let target = if exhausted {
            NodeState::Failed
        } else {
            NodeState::Pending
        };

        let mut effects = vec![self.transition(node_id, target, at)?];
        if let Some(record) = self.state.nodes.get_mut(node_id) {
            record.review_rounds = rounds;
            record.feedback.push(feedback);
            record.review_payload = None;
            record.session_id = None;
            record.deadline = None;
            if exhausted {
                record.failure = Some(NodeFailure::ReviewRejected { rounds });
                record.finished_at = Some(at);
            }
        }
        effects.extend(self.schedule(at)?);
        Ok(Outcome::applied(effects))
    }

    /// Dispatch ready nodes, lowest id first, while slots remain.
    fn schedule(&mut self, at: DateTime<Utc>) -> Result<Vec<Effect>, EngineError> {
        let free = self
            .max_concurrency
            .saturating_sub(self.state.active_count());
        if free == 0 {
            return Ok(Vec::new());
        }

        let ready: Vec<String> = self
            .state
            .nodes
            .iter()
            .filter(|(id, r)| {
                r.state == NodeState::Pending
                    && retry::is_backoff_elapsed(r.not_before, at)
                    && self.state.dependencies_completed(id)
            })
            .map(|(id, _)| id.clone())
            .take(free)
            .collect();

        let mut effects = Vec::new();
        for id in ready {
            effects.extend(self.dispatch(&id, at)?);
        }
        Ok(effects)
    }

    fn dispatch(&mut self, node_id: &str, at: DateTime<Utc>) -> Result<Vec<Effect>, EngineError> {
        if let Some(blocking) = self.state.first_incomplete_dependency(node_id) {
            return Err(EngineError::Dispatch {
                node: node_id.to_string(),
                blocking: blocking.clone(),
            });
        }

        let upstream: BTreeMap<String, serde_json::Value> = self
            .state
            .topology
            .predecessors(node_id)
            .filter_map(|p| {
                let data = self.state.node(p)?.output.as_ref()?.data.clone();
                Some((p.clone(), data))
            })
            .collect();

        let state_change = self.transition(node_id, NodeState::Running, at)?;
        let session_id = Uuid::new_v4();
        let Some(record) = self.state.nodes.get_mut(node_id) else {
            return Err(EngineError::UnknownNode(node_id.to_string()));
        };
        record.session_id = Some(session_id);
        record.dispatch_count += 1;
        record.not_before = None;
        record.started_at = Some(at);
        record.review_payload = None;

        let request = DispatchRequest {
            execution_id: self.state.execution_id,
            node_id: node_id.to_string(),
            session_id,
            context: DispatchContext {
                attempt: record.dispatch_count,
                error_count: record.error_count,
                review_rounds: record.review_rounds,
                feedback: record.feedback.clone(),
                upstream,
            },
        };
        info!(
            node = node_id,
            session = %session_id,
            attempt = request.context.attempt,
            "node dispatched"
        );

        let mut effects = vec![state_change, Effect::Dispatch(request)];
        effects.extend(self.arm_timeout(node_id, at));
        Ok(effects)
    }

    fn arm_timeout(&mut self, node_id: &str, at: DateTime<Utc>) -> Option<Effect> {
        let timeout = self.settings.get(node_id)?.timeout?;
        let deadline = retry::retry_at(at, timeout)?;
        let record = self.state.nodes.get_mut(node_id)?;
        let session_id = record.session_id?;
        record.deadline = Some(deadline);
        Some(Effect::ArmTimeout {
            node_id: node_id.to_string(),
            session_id,
            deadline,
        })
    }

    /// Apply one validated transition and report it.
    fn transition(
        &mut self,
        node_id: &str,
        to: NodeState,
        at: DateTime<Utc>,
    ) -> Result<Effect, EngineError> {
        let record = self
            .state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.to_string()))?;
        let from = record.state;
        record.try_transition(node_id, to)?;
        debug!(node = node_id, %from, %to, "node transition");
        Ok(Effect::StateChanged(StateChange {
            node_id: node_id.to_string(),
            from,
            to,
            at,
        }))
    }
}
