//! Integration tests for driving executions through the threaded runtime

use anyhow::Result;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use trellis::config::Config;
use trellis::engine::{
    AgentLauncher, DispatchRequest, EngineEvent, ExecutionEngine, ExecutionStatus, Hook,
    HookKind, NoopObserver, NodeState, ReviewDecision, Runtime, RuntimeHandle, StateChange,
    StateObserver, StatusSummary, StopOutput, StopStatus, TimerQueue,
};
use trellis::error::NodeFailure;
use trellis::models::{Category, Graph, GraphEdge, GraphNode, RetryPolicy};

fn diamond() -> Graph {
    let mut graph = Graph::new();
    graph.add_node(GraphNode::new("checkout", Category::Setup, 1));
    graph.add_node(GraphNode::new("build", Category::Execution, 5));
    graph.add_node(GraphNode::new("docs", Category::Execution, 2));
    graph.add_node(GraphNode::new("ship", Category::Utility, 1));
    for (from, to) in [
        ("checkout", "build"),
        ("checkout", "docs"),
        ("build", "ship"),
        ("docs", "ship"),
    ] {
        graph.add_edge(GraphEdge::control(from, to));
    }
    graph
}

fn config() -> Config {
    let mut config = Config::default();
    config.retry.default = RetryPolicy::immediate(3);
    config.execution.jitter_seed = Some(1);
    config
}

#[derive(Clone, Default)]
struct Recorder {
    changes: Arc<Mutex<Vec<StateChange>>>,
    finished: Arc<Mutex<Option<StatusSummary>>>,
}

impl StateObserver for Recorder {
    fn on_state_change(&mut self, change: &StateChange) {
        self.changes.lock().unwrap().push(change.clone());
    }

    fn on_finished(&mut self, summary: &StatusSummary) {
        *self.finished.lock().unwrap() = Some(summary.clone());
    }
}

/// Replies to every dispatch right away, failing listed nodes once.
struct ScriptedLauncher {
    fail_once: HashSet<String>,
    review: HashSet<String>,
    silent: HashSet<String>,
    launched: Arc<Mutex<Vec<DispatchRequest>>>,
}

impl ScriptedLauncher {
    fn new() -> Self {
        Self {
            fail_once: HashSet::new(),
            review: HashSet::new(),
            silent: HashSet::new(),
            launched: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl AgentLauncher for ScriptedLauncher {
    fn launch(&mut self, request: &DispatchRequest, handle: &RuntimeHandle) -> Result<()> {
        self.launched.lock().unwrap().push(request.clone());
        let node = request.node_id.as_str();
        let session = Some(request.session_id);

        if self.silent.contains(node) {
            return Ok(());
        }
        if self.fail_once.remove(node) {
            return handle.hook(Hook::error(node, session, "transient failure"));
        }
        if self.review.remove(node) {
            handle.hook(Hook::checkpoint(node, session, serde_json::json!({"pr": 42})))?;
            return handle.review(node, ReviewDecision::Accept);
        }

        // Rejected by the engine; the driver keeps going
        handle.hook(Hook::new("not-in-graph", None, HookKind::Start))?;
        handle.hook(Hook::new(
            node,
            session,
            HookKind::Stop {
                status: StopStatus::Success,
                output: Some(StopOutput {
                    data: serde_json::json!({ "produced_by": node }),
                    metrics: Default::default(),
                }),
                next: None,
                error: None,
            },
        ))
    }
}

#[test]
fn test_runtime_completes_graph() {
    let engine = ExecutionEngine::new(&diamond(), &config()).expect("Should create engine");
    let launcher = ScriptedLauncher::new();
    let launched = Arc::clone(&launcher.launched);
    let recorder = Recorder::default();
    let finished = Arc::clone(&recorder.finished);

    let runtime = Runtime::spawn(engine, launcher, recorder.clone());
    let summary = runtime.join().expect("Runtime should finish");

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.counts.completed, 4);
    assert_eq!(finished.lock().unwrap().as_ref(), Some(&summary));

    let order: Vec<String> = launched
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.node_id.clone())
        .collect();
    assert_eq!(order.first().map(String::as_str), Some("checkout"));
    assert_eq!(order.last().map(String::as_str), Some("ship"));
    assert_eq!(order.len(), 4);

    let ship = launched
        .lock()
        .unwrap()
        .iter()
        .find(|r| r.node_id == "ship")
        .cloned()
        .expect("ship dispatched");
    assert_eq!(ship.context.upstream.len(), 2);
    assert_eq!(
        ship.context.upstream.get("build"),
        Some(&serde_json::json!({"produced_by": "build"}))
    );

    let changes = recorder.changes.lock().unwrap();
    assert!(changes
        .iter()
        .any(|c| c.node_id == "ship" && c.to == NodeState::Completed));
}

#[test]
fn test_runtime_retries_failed_node() {
    let engine = ExecutionEngine::new(&diamond(), &config()).unwrap();
    let mut launcher = ScriptedLauncher::new();
    launcher.fail_once.insert("build".to_string());
    let launched = Arc::clone(&launcher.launched);

    let summary = Runtime::spawn(engine, launcher, NoopObserver)
        .join()
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    let builds: Vec<DispatchRequest> = launched
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.node_id == "build")
        .cloned()
        .collect();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[1].context.error_count, 1);
    assert_ne!(builds[0].session_id, builds[1].session_id);
    assert_eq!(summary.nodes["build"].error_count, 0);
}

#[test]
fn test_runtime_review_round_trip() {
    let engine = ExecutionEngine::new(&diamond(), &config()).unwrap();
    let mut launcher = ScriptedLauncher::new();
    launcher.review.insert("docs".to_string());
    let recorder = Recorder::default();

    let summary = Runtime::spawn(engine, launcher, recorder.clone())
        .join()
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    let changes = recorder.changes.lock().unwrap();
    assert!(changes
        .iter()
        .any(|c| c.node_id == "docs" && c.to == NodeState::Reviewing));
}

#[test]
fn test_runtime_timeout_fails_silent_node() {
    let mut cfg = config();
    cfg.retry.default = RetryPolicy::immediate(1);
    cfg.execution.default_timeout_secs = Some(1);
    let engine = ExecutionEngine::new(&diamond(), &cfg).unwrap();
    let mut launcher = ScriptedLauncher::new();
    launcher.silent.insert("docs".to_string());

    let summary = Runtime::spawn(engine, launcher, NoopObserver)
        .join()
        .unwrap();

    assert_eq!(summary.status, ExecutionStatus::Failed);
    let docs = &summary.nodes["docs"];
    assert_eq!(docs.state, NodeState::Failed);
    assert!(matches!(
        &docs.failure,
        Some(NodeFailure::RetryExhausted { last, .. }) if matches!(**last, NodeFailure::Timeout { .. })
    ));
    assert_eq!(summary.nodes["ship"].state, NodeState::Pending);
}

#[test]
fn test_runtime_cancel() {
    let engine = ExecutionEngine::new(&diamond(), &config()).unwrap();
    let mut launcher = ScriptedLauncher::new();
    launcher.silent.insert("checkout".to_string());

    let runtime = Runtime::spawn(engine, launcher, NoopObserver);
    runtime.handle().cancel().unwrap();
    let summary = runtime.join().unwrap();

    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert!(summary.cancelled);
    assert_eq!(summary.counts.failed, 4);
}

#[test]
fn test_runtime_shutdown_leaves_state() {
    let engine = ExecutionEngine::new(&diamond(), &config()).unwrap();
    let mut launcher = ScriptedLauncher::new();
    launcher.silent.insert("checkout".to_string());

    let runtime = Runtime::spawn(engine, launcher, NoopObserver);
    let handle = runtime.handle();
    handle.shutdown().unwrap();
    let summary = runtime.join().unwrap();

    assert_eq!(summary.status, ExecutionStatus::Running);
    assert_eq!(summary.nodes["checkout"].state, NodeState::Running);
    assert!(handle.cancel().is_err());
}

#[test]
fn test_timer_queue_orders_by_due_time() {
    let base = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let retry = |node: &str, secs: i64| EngineEvent::RetryDue {
        node_id: node.to_string(),
        at: base + ChronoDuration::seconds(secs),
    };

    let mut queue = TimerQueue::new();
    queue.push(base + ChronoDuration::seconds(30), retry("late", 30));
    queue.push(base + ChronoDuration::seconds(5), retry("early", 5));
    queue.push(base + ChronoDuration::seconds(5), retry("early-second", 5));

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.next_due(), Some(base + ChronoDuration::seconds(5)));

    let due = queue.pop_due(base + ChronoDuration::seconds(10));
    assert_eq!(due, vec![retry("early", 5), retry("early-second", 5)]);
    assert_eq!(queue.len(), 1);
    assert!(queue.pop_due(base).is_empty());
    assert_eq!(queue.pop_due(base + ChronoDuration::seconds(30)).len(), 1);
    assert!(queue.is_empty());
}
