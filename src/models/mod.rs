pub mod graph;
pub mod requirement;
pub mod retry;
pub mod task;

pub use graph::{Graph, GraphEdge, GraphMetadata, GraphNode, PortRef, Position};
pub use requirement::{Constraints, DependencyHint, Requirement, Selector};
pub use retry::{BackoffKind, RetryPolicy};
pub use task::{Category, PortSpec, TaskSpec};
