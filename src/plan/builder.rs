//! Graph construction from selected task specs.
//!
//! Edges come from three sources, in this order:
//! - category precedence (setup -> execution -> testing -> integration/review -> utility)
//! - requirement dependency hints
//! - port matches between a node's inputs and an earlier node's outputs
//!
//! Nodes of one category with no data dependency between them stay siblings,
//! which is where parallelism comes from.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::BuildError;
use crate::models::graph::{CONTROL_INPUT, CONTROL_OUTPUT};
use crate::models::{Category, Graph, GraphEdge, GraphNode, Position, Requirement, TaskSpec};
use crate::validation::validate_task;

/// Build a raw graph from an ordered task selection.
pub fn build(tasks: &[TaskSpec], requirement: &Requirement) -> Result<Graph, BuildError> {
    for task in tasks {
        validate_task(task).map_err(|e| BuildError::InvalidTask {
            name: task.name.clone(),
            reason: e.to_string(),
        })?;
    }

    let mut graph = Graph::new();
    graph.metadata.created_at = Some(Utc::now());

    let mut rows: BTreeMap<u8, u32> = BTreeMap::new();
    for task in tasks {
        let mut node = GraphNode::from_task(task);
        let stage = task.category.stage();
        let row = rows.entry(stage).or_insert(0);
        node.position = Position {
            x: u32::from(stage),
            y: *row,
        };
        *row += 1;
        graph.add_node(node);
    }

    add_setup_chain(&mut graph, tasks);
    add_precedence_edges(&mut graph, tasks);
    add_hint_edges(&mut graph, tasks, requirement);
    add_port_edges(&mut graph, tasks)?;

    debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "graph built"
    );
    Ok(graph)
}

/// Extra setup nodes run after the first one so setup stays the unique root.
fn add_setup_chain(graph: &mut Graph, tasks: &[TaskSpec]) {
    let mut setups = tasks.iter().filter(|t| t.category == Category::Setup);
    let Some(root) = setups.next() else {
        return;
    };
    let root_id = root.id();
    for other in setups {
        graph.add_edge(GraphEdge::control(&root_id, &other.id()));
    }
}

/// Connect every node to all nodes of the nearest lower populated stage.
fn add_precedence_edges(graph: &mut Graph, tasks: &[TaskSpec]) {
    let mut by_stage: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for task in tasks {
        by_stage
            .entry(task.category.stage())
            .or_default()
            .push(task.id());
    }

    for task in tasks {
        let stage = task.category.stage();
        let Some((_, previous)) = by_stage.range(..stage).next_back() else {
            continue;
        };
        let target = task.id();
        for source in previous {
            graph.add_edge(GraphEdge::control(source, &target));
        }
    }
}

fn add_hint_edges(graph: &mut Graph, tasks: &[TaskSpec], requirement: &Requirement) {
    for hint in &requirement.hints {
        for before in tasks.iter().filter(|t| hint.before.matches(t)) {
            for after in tasks.iter().filter(|t| hint.after.matches(t)) {
                if before.id() != after.id() {
                    graph.add_edge(GraphEdge::control(&before.id(), &after.id()));
                }
            }
        }
    }
}

/// Bind each input to the nearest earlier compatible producer.
fn add_port_edges(graph: &mut Graph, tasks: &[TaskSpec]) -> Result<(), BuildError> {
    for (index, consumer) in tasks.iter().enumerate() {
        for input in &consumer.inputs {
            if input.name == CONTROL_INPUT {
                continue;
            }

            let producer = tasks[..index].iter().rev().find(|candidate| {
                candidate
                    .outputs
                    .iter()
                    .any(|output| output.name != CONTROL_OUTPUT && output.is_compatible_with(input))
            });

            match producer {
                Some(producer) => {
                    graph.add_edge(GraphEdge::new(
                        &producer.id(),
                        &input.name,
                        &consumer.id(),
                        &input.name,
                    ));
                }
                None if input.required => {
                    return Err(BuildError::MissingProducer {
                        node: consumer.id(),
                        port: input.name.clone(),
                    });
                }
                None => {}
            }
        }
    }
    Ok(())
}
