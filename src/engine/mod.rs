//! Hook-driven execution of a validated graph.

pub mod core;
pub mod hooks;
pub mod retry;
pub mod runtime;
pub mod state;


pub use self::core::{
    DispatchContext, DispatchRequest, Disposition, Effect, EngineEvent, ExecutionEngine,
    IgnoreReason, Outcome, StateChange,
};
pub use hooks::{
    Hook, HookKind, NextAction, NextActionKind, ReviewDecision, StopOutput, StopStatus,
};
pub use runtime::{AgentLauncher, NoopObserver, Runtime, RuntimeHandle, StateObserver, TimerQueue};
pub use state::{
    summarize, ExecutionState, ExecutionStatus, NodeRecord, NodeState, StatusSummary, Topology,
};
