//! Planning pipeline: build, canonicalize, validate, layer, analyze, optimize.
//!
//! ```text
//! requirement + task specs -> builder -> raw graph
//!   -> canonical hash (schedule cache key)
//!   -> validator (errors reject the graph)
//!   -> layering + critical path
//!   -> optimizer
//! ```

pub mod builder;
pub mod cache;
pub mod canonical;
pub mod critical_path;
pub mod layering;
pub mod optimizer;
pub mod validator;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OrderingWarning, PlanError};
use crate::models::{Constraints, Graph, Position, Requirement, TaskSpec};
use crate::store::TaskStore;

pub use cache::{PlanCache, Schedule};
pub use canonical::{content_hash, normalize, CanonicalForm};
pub use critical_path::CriticalPath;
pub use layering::Layering;
pub use validator::{validate, ValidationReport};

/// Planning request: the selected tasks plus the structured requirement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Task names (or `name@version` ids) in selection order
    pub tasks: Vec<String>,
    #[serde(default)]
    pub requirement: Requirement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub max_parallelism: usize,
    /// Minutes
    pub estimated_time: u64,
    /// Number of nodes on the critical path
    pub critical_path_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub graph: Graph,
    pub stats: PlanStats,
    pub layers: Vec<Vec<String>>,
    pub critical_path: Vec<String>,
    pub warnings: Vec<OrderingWarning>,
    /// Content hash of the returned (optimized) graph
    pub content_hash: String,
    /// Schedule served from the cache
    pub cached: bool,
    /// Estimated time exceeds the requirement's time budget
    pub budget_exceeded: bool,
}

/// Turns requests into validated, laid-out, optimized graphs.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    cache: PlanCache,
}

impl Planner {
    pub fn new(cache: PlanCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PlanCache {
        &mut self.cache
    }

    /// Resolve the request's tasks from the store and plan them.
    pub fn plan(
        &mut self,
        request: &PlanRequest,
        store: &TaskStore,
    ) -> Result<PlanResponse, PlanError> {
        let tasks = store.select(&request.tasks)?;
        let mut response = self.plan_tasks(&tasks, &request.requirement)?;
        if let Some(name) = &request.name {
            response.graph.metadata.name = Some(name.clone());
        }
        Ok(response)
    }

    pub fn plan_tasks(
        &mut self,
        tasks: &[TaskSpec],
        requirement: &Requirement,
    ) -> Result<PlanResponse, PlanError> {
        let graph = builder::build(tasks, requirement)?;
        self.plan_graph(graph, &requirement.constraints)
    }

    /// Validate, schedule and optimize an already built graph.
    pub fn plan_graph(
        &mut self,
        mut graph: Graph,
        constraints: &Constraints,
    ) -> Result<PlanResponse, PlanError> {
        let (schedule, cached) = self.schedule(&graph)?;

        graph.edges = schedule.optimized_edges.clone();
        apply_layout(&mut graph, &schedule.layering);

        let estimated_time = estimate_time(&graph, &schedule, constraints.max_parallelism);
        let budget_exceeded = constraints
            .time_budget
            .is_some_and(|budget| estimated_time > budget);

        let hash = content_hash(&graph);
        graph.metadata.content_hash = Some(hash.clone());

        let stats = PlanStats {
            total_nodes: graph.nodes.len(),
            total_edges: graph.edges.len(),
            max_parallelism: schedule.layering.max_parallelism,
            estimated_time,
            critical_path_length: schedule.critical_path.path.len(),
        };

        info!(
            nodes = stats.total_nodes,
            edges = stats.total_edges,
            max_parallelism = stats.max_parallelism,
            estimated_time,
            cached,
            "plan ready"
        );

        Ok(PlanResponse {
            graph,
            stats,
            layers: schedule.layering.layers.clone(),
            critical_path: schedule.critical_path.path.clone(),
            warnings: schedule.warnings.clone(),
            content_hash: hash,
            cached,
            budget_exceeded,
        })
    }

    /// Compute (or fetch from cache) the schedule of a graph.
    ///
    /// Returns the schedule and whether it came from the cache.
    pub fn schedule(&mut self, graph: &Graph) -> Result<(Schedule, bool), PlanError> {
        let key = content_hash(graph);
        if let Some(schedule) = self.cache.get(&key) {
            debug!(hash = %key, "schedule cache hit");
            return Ok((schedule.clone(), true));
        }

        let schedule = compute_schedule(graph)?;
        self.cache.insert(key, schedule.clone());
        Ok((schedule, false))
    }
}

/// Validate a graph and derive its schedule without caching.
pub fn compute_schedule(graph: &Graph) -> Result<Schedule, PlanError> {
    let warnings = validator::validate(graph)
        .into_result()
        .map_err(PlanError::Invalid)?;

    let layering = layering::layer(graph).map_err(|e| PlanError::Invalid(vec![e]))?;
    let critical_path = critical_path::analyze(graph, &layering);

    let mut optimized = graph.clone();
    optimizer::optimize(&mut optimized);
    canonical::sort_in_place(&mut optimized);

    Ok(Schedule {
        layering,
        critical_path,
        warnings,
        optimized_edges: optimized.edges,
    })
}

/// Place each node at `(layer, index within layer)`.
fn apply_layout(graph: &mut Graph, layering: &Layering) {
    for (x, layer) in layering.layers.iter().enumerate() {
        for (y, id) in layer.iter().enumerate() {
            if let Some(node) = graph.node_mut(id) {
                node.position = Position {
                    x: x as u32,
                    y: y as u32,
                };
            }
        }
    }
}

/// Critical-path weight, or per-layer greedy packing when parallelism is
/// capped below the widest layer.
fn estimate_time(graph: &Graph, schedule: &Schedule, max_parallelism: Option<usize>) -> u64 {
    let slots = match max_parallelism {
        Some(slots) if slots > 0 && slots < schedule.layering.max_parallelism => slots,
        _ => return schedule.critical_path.total,
    };

    schedule
        .layering
        .layers
        .iter()
        .map(|layer| {
            let durations = layer
                .iter()
                .filter_map(|id| graph.node(id))
                .map(|n| n.duration)
                .collect();
            layer_makespan(durations, slots)
        })
        .fold(0, u64::saturating_add)
}

/// Longest-processing-time-first packing of durations onto `slots` workers.
pub fn layer_makespan(mut durations: Vec<u64>, slots: usize) -> u64 {
    durations.sort_unstable_by(|a, b| b.cmp(a));
    let mut loads = vec![0u64; slots.max(1)];
    for duration in durations {
        if let Some(least) = loads.iter_mut().min() {
            *least = least.saturating_add(duration);
        }
    }
    loads.into_iter().max().unwrap_or(0)
}
