//! Threaded driver around [`ExecutionEngine`].
//!
//! One thread owns the engine and applies events one at a time: hooks and
//! review decisions arrive over a channel, retry and timeout events come off
//! a timer queue. The thread sleeps until the next timer is due or a message
//! arrives, so there is no polling interval.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::core::{DispatchRequest, Effect, EngineEvent, ExecutionEngine, StateChange};
use super::hooks::{Hook, ReviewDecision};
use super::state::StatusSummary;

/// Starts agent work for a dispatched node.
///
/// Launching must not block on the agent finishing; results come back later
/// as hooks sent through the handle.
pub trait AgentLauncher: Send {
    fn launch(&mut self, request: &DispatchRequest, handle: &RuntimeHandle) -> Result<()>;
}

/// Receives state changes as the driver applies them.
pub trait StateObserver: Send {
    fn on_state_change(&mut self, _change: &StateChange) {}

    fn on_finished(&mut self, _summary: &StatusSummary) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl StateObserver for NoopObserver {}

enum Command {
    Event(EngineEvent),
    Shutdown,
}

/// Cloneable sender side of a running execution.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: Sender<Command>,
}

impl RuntimeHandle {
    pub fn hook(&self, hook: Hook) -> Result<()> {
        self.send(Command::Event(EngineEvent::Hook(hook)))
    }

    pub fn review(&self, node_id: &str, decision: ReviewDecision) -> Result<()> {
        self.send(Command::Event(EngineEvent::Review {
            node_id: node_id.to_string(),
            decision,
            at: Utc::now(),
        }))
    }

    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Event(EngineEvent::Cancel { at: Utc::now() }))
    }

    /// Stop the driver without touching node states.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("execution runtime has stopped"))
    }
}

struct Timer {
    due: DateTime<Utc>,
    seq: u64,
    event: EngineEvent,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Min-heap of engine events keyed by due time. Events due at the same
/// instant fire in insertion order.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Timer>>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due: DateTime<Utc>, event: EngineEvent) {
        self.seq += 1;
        self.heap.push(Reverse(Timer {
            due,
            seq: self.seq,
            event,
        }));
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(t)| t.due)
    }

    /// Remove and return every event due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(t)| t.due <= now) {
            if let Some(Reverse(timer)) = self.heap.pop() {
                due.push(timer.event);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// A running execution.
pub struct Runtime {
    handle: RuntimeHandle,
    thread: JoinHandle<Result<StatusSummary>>,
}

impl Runtime {
    pub fn spawn<L, O>(engine: ExecutionEngine, launcher: L, observer: O) -> Self
    where
        L: AgentLauncher + 'static,
        O: StateObserver + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = RuntimeHandle { tx };
        let driver = Driver {
            engine,
            launcher,
            observer,
            timers: TimerQueue::new(),
            backlog: VecDeque::new(),
            handle: handle.clone(),
        };
        let thread = thread::spawn(move || driver.run(rx));
        Self { handle, thread }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Wait for the execution to finish and return its final summary.
    pub fn join(self) -> Result<StatusSummary> {
        self.thread
            .join()
            .map_err(|_| anyhow!("execution runtime thread panicked"))?
    }
}

struct Driver<L, O> {
    engine: ExecutionEngine,
    launcher: L,
    observer: O,
    timers: TimerQueue,
    /// Events produced by the driver itself, applied before waiting again
    backlog: VecDeque<EngineEvent>,
    handle: RuntimeHandle,
}

impl<L: AgentLauncher, O: StateObserver> Driver<L, O> {
    fn run(mut self, rx: Receiver<Command>) -> Result<StatusSummary> {
        info!(execution = %self.engine.execution_id(), "execution runtime started");
        let effects = self.engine.start(Utc::now())?;
        self.perform(effects);

        loop {
            self.drain_backlog();
            let now = Utc::now();
            for event in self.timers.pop_due(now) {
                self.apply(event);
            }
            self.drain_backlog();

            if self.engine.status().is_terminal() {
                break;
            }

            let received = match self.timers.next_due() {
                Some(due) => {
                    let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
                    match rx.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match received {
                Command::Event(event) => self.apply(event),
                Command::Shutdown => {
                    info!("execution runtime shutting down");
                    break;
                }
            }
        }

        let summary = self.engine.summary();
        info!(
            execution = %summary.execution_id,
            status = %summary.status,
            "execution runtime finished"
        );
        self.observer.on_finished(&summary);
        Ok(summary)
    }

    fn drain_backlog(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: EngineEvent) {
        match self.engine.apply(event) {
            Ok(outcome) => self.perform(outcome.effects),
            Err(e) => warn!(error = %e, "event rejected"),
        }
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StateChanged(change) => self.observer.on_state_change(&change),
                Effect::Dispatch(request) => {
                    if let Err(e) = self.launcher.launch(&request, &self.handle) {
                        warn!(node = %request.node_id, error = %e, "agent launch failed");
                        let hook = Hook::error(
                            &request.node_id,
                            Some(request.session_id),
                            &format!("launch failed: {e}"),
                        );
                        self.backlog.push_back(EngineEvent::Hook(hook));
                    }
                }
                Effect::ScheduleRetry { node_id, at } => {
                    debug!(node = %node_id, %at, "retry timer armed");
                    self.timers.push(at, EngineEvent::RetryDue { node_id, at });
                }
                Effect::ArmTimeout {
                    node_id,
                    session_id,
                    deadline,
                } => {
                    self.timers.push(
                        deadline,
                        EngineEvent::TimeoutElapsed {
                            node_id,
                            session_id,
                            deadline,
                            at: deadline,
                        },
                    );
                }
            }
        }
    }
}
