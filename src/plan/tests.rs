use super::*;
use crate::error::{BuildError, GraphError};
use crate::models::{
    Category, DependencyHint, Graph, GraphEdge, GraphNode, PortSpec, Requirement, Selector,
    TaskSpec,
};

fn node(id: &str, duration: u64) -> GraphNode {
    GraphNode::new(id, Category::Execution, duration)
}

fn graph(nodes: &[(&str, u64)], edges: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new();
    for (id, duration) in nodes {
        graph.add_node(node(id, *duration));
    }
    for (from, to) in edges {
        graph.add_edge(GraphEdge::control(from, to));
    }
    graph
}

fn has_edge(graph: &Graph, from: &str, to: &str) -> bool {
    graph
        .edges
        .iter()
        .any(|e| e.from.node == from && e.to.node == to)
}

// =========================================================================
// Canonicalizer
// =========================================================================

#[test]
fn test_hash_ignores_insertion_order() {
    let forward = graph(&[("a", 1), ("b", 2), ("c", 3)], &[("a", "b"), ("b", "c")]);
    let backward = graph(&[("c", 3), ("b", 2), ("a", 1)], &[("b", "c"), ("a", "b")]);

    assert_eq!(content_hash(&forward), content_hash(&backward));
    assert_eq!(normalize(&forward), normalize(&backward));
}

#[test]
fn test_hash_ignores_duplicate_edges() {
    let single = graph(&[("a", 1), ("b", 2)], &[("a", "b")]);
    let mut doubled = single.clone();
    doubled.edges.push(GraphEdge::control("a", "b"));

    assert_eq!(content_hash(&single), content_hash(&doubled));
}

#[test]
fn test_hash_ignores_layout_and_summary() {
    let plain = graph(&[("a", 1)], &[]);
    let mut decorated = plain.clone();
    if let Some(n) = decorated.node_mut("a") {
        n.summary = "Compile the workspace".to_string();
        n.position = Position { x: 4, y: 2 };
    }
    decorated.metadata.name = Some("nightly".to_string());

    assert_eq!(content_hash(&plain), content_hash(&decorated));
}

#[test]
fn test_hash_tracks_semantic_changes() {
    let base = graph(&[("a", 1), ("b", 2)], &[("a", "b")]);
    let mut slower = base.clone();
    if let Some(n) = slower.node_mut("b") {
        n.duration = 20;
    }
    let rewired = graph(&[("a", 1), ("b", 2)], &[("b", "a")]);

    let hash = content_hash(&base);
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(hash, content_hash(&slower));
    assert_ne!(hash, content_hash(&rewired));
}

#[test]
fn test_normalize_sorts_nodes_and_edges() {
    let g = graph(&[("c", 1), ("a", 1), ("b", 1)], &[("b", "c"), ("a", "c"), ("a", "b")]);
    let form = normalize(&g);

    let ids: Vec<&str> = form.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    let edges: Vec<(&str, &str)> = form
        .edges
        .iter()
        .map(|e| (e.from.node.as_str(), e.to.node.as_str()))
        .collect();
    assert_eq!(edges, vec![("a", "b"), ("a", "c"), ("b", "c")]);
}

// =========================================================================
// Builder
// =========================================================================

fn pipeline_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("checkout", "1.0.0", Category::Setup).with_duration(2),
        TaskSpec::new("build", "1.0.0", Category::Execution)
            .with_duration(10)
            .with_output(PortSpec::optional("artifact").with_type("binary")),
        TaskSpec::new("docs", "1.0.0", Category::Execution).with_duration(4),
        TaskSpec::new("unit", "1.0.0", Category::Testing)
            .with_duration(6)
            .with_input(PortSpec::required("artifact").with_type("binary")),
    ]
}

#[test]
fn test_build_adds_category_precedence() {
    let g = builder::build(&pipeline_tasks(), &Requirement::default()).unwrap();

    assert_eq!(g.nodes.len(), 4);
    assert!(has_edge(&g, "checkout@1.0.0", "build@1.0.0"));
    assert!(has_edge(&g, "checkout@1.0.0", "docs@1.0.0"));
    assert!(has_edge(&g, "build@1.0.0", "unit@1.0.0"));
    assert!(has_edge(&g, "docs@1.0.0", "unit@1.0.0"));
    // Same-category siblings stay independent
    assert!(!has_edge(&g, "build@1.0.0", "docs@1.0.0"));
    assert!(!has_edge(&g, "docs@1.0.0", "build@1.0.0"));
}

#[test]
fn test_build_binds_data_ports() {
    let g = builder::build(&pipeline_tasks(), &Requirement::default()).unwrap();

    let data: Vec<&GraphEdge> = g.edges.iter().filter(|e| !e.is_control()).collect();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].from.node, "build@1.0.0");
    assert_eq!(data[0].from.port, "artifact");
    assert_eq!(data[0].to.node, "unit@1.0.0");
    assert_eq!(data[0].to.port, "artifact");
    assert!(validate(&g).is_valid());
}

#[test]
fn test_build_missing_producer() {
    let tasks = vec![TaskSpec::new("deploy", "1.0.0", Category::Utility)
        .with_input(PortSpec::required("image"))];

    let result = builder::build(&tasks, &Requirement::default());
    assert_eq!(
        result,
        Err(BuildError::MissingProducer {
            node: "deploy@1.0.0".to_string(),
            port: "image".to_string(),
        })
    );
}

#[test]
fn test_build_skips_unbound_optional_input() {
    let tasks = vec![TaskSpec::new("deploy", "1.0.0", Category::Utility)
        .with_input(PortSpec::optional("image"))];

    let g = builder::build(&tasks, &Requirement::default()).unwrap();
    assert!(g.edges.is_empty());
}

#[test]
fn test_build_incompatible_port_type_is_not_bound() {
    let tasks = vec![
        TaskSpec::new("build", "1.0.0", Category::Execution)
            .with_output(PortSpec::optional("artifact").with_type("binary")),
        TaskSpec::new("unit", "1.0.0", Category::Testing)
            .with_input(PortSpec::required("artifact").with_type("report")),
    ];

    let result = builder::build(&tasks, &Requirement::default());
    assert!(matches!(result, Err(BuildError::MissingProducer { .. })));
}

#[test]
fn test_build_chains_extra_setup_nodes() {
    let tasks = vec![
        TaskSpec::new("checkout", "1.0.0", Category::Setup),
        TaskSpec::new("toolchain", "1.0.0", Category::Setup),
        TaskSpec::new("build", "1.0.0", Category::Execution),
    ];
    let g = builder::build(&tasks, &Requirement::default()).unwrap();

    assert!(has_edge(&g, "checkout@1.0.0", "toolchain@1.0.0"));
    let layering = layering::layer(&g).unwrap();
    assert_eq!(layering.layers[0], vec!["checkout@1.0.0"]);
}

#[test]
fn test_build_applies_dependency_hints() {
    let tasks = vec![
        TaskSpec::new("lint", "1.0.0", Category::Testing),
        TaskSpec::new("unit", "1.0.0", Category::Testing),
    ];
    let requirement = Requirement {
        hints: vec![DependencyHint {
            before: Selector::Task("lint".to_string()),
            after: Selector::Task("unit".to_string()),
        }],
        ..Default::default()
    };

    let g = builder::build(&tasks, &requirement).unwrap();
    assert!(has_edge(&g, "lint@1.0.0", "unit@1.0.0"));
    assert!(!has_edge(&g, "unit@1.0.0", "lint@1.0.0"));
}

#[test]
fn test_build_rejects_invalid_task() {
    let tasks = vec![TaskSpec::new("bad name", "1.0.0", Category::Execution)];
    let result = builder::build(&tasks, &Requirement::default());
    assert!(matches!(result, Err(BuildError::InvalidTask { .. })));
}

// =========================================================================
// Layering and critical path
// =========================================================================

#[test]
fn test_chain_layers_and_critical_path() {
    let g = graph(&[("A", 10), ("B", 5)], &[("A", "B")]);
    let layering = layering::layer(&g).unwrap();

    assert_eq!(layering.layers, vec![vec!["A"], vec!["B"]]);
    assert_eq!(layering.max_parallelism, 1);

    let critical = critical_path::analyze(&g, &layering);
    assert_eq!(critical.path, vec!["A", "B"]);
    assert_eq!(critical.total, 15);
}

#[test]
fn test_fan_out_layers() {
    let g = graph(&[("A", 1), ("B", 1), ("C", 1)], &[("A", "B"), ("A", "C")]);
    let layering = layering::layer(&g).unwrap();

    assert_eq!(layering.layers, vec![vec!["A"], vec!["B", "C"]]);
    assert_eq!(layering.max_parallelism, 2);
    assert_eq!(layering.layer_of("C"), Some(1));
}

#[test]
fn test_layers_respect_every_edge() {
    let g = graph(
        &[("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1), ("f", 1)],
        &[
            ("a", "c"),
            ("b", "c"),
            ("c", "d"),
            ("a", "e"),
            ("e", "f"),
            ("d", "f"),
        ],
    );
    let layering = layering::layer(&g).unwrap();

    assert_eq!(layering.assignment.len(), g.nodes.len());
    for edge in &g.edges {
        let from = layering.layer_of(&edge.from.node).unwrap();
        let to = layering.layer_of(&edge.to.node).unwrap();
        assert!(from < to, "{edge}");
    }
}

#[test]
fn test_critical_path_ties_prefer_smallest_id() {
    let g = graph(
        &[("a", 1), ("b", 5), ("c", 5), ("d", 1)],
        &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    );
    let layering = layering::layer(&g).unwrap();
    let critical = critical_path::analyze(&g, &layering);

    assert_eq!(critical.path, vec!["a", "b", "d"]);
    assert_eq!(critical.total, 7);
    assert_eq!(critical.earliest_finish.get("c"), Some(&6));
}

#[test]
fn test_critical_path_of_empty_graph() {
    let g = Graph::new();
    let layering = layering::layer(&g).unwrap();
    let critical = critical_path::analyze(&g, &layering);

    assert!(critical.path.is_empty());
    assert_eq!(critical.total, 0);
}

#[test]
fn test_critical_path_saturates_huge_durations() {
    let g = graph(&[("a", u64::MAX), ("b", 10)], &[("a", "b")]);
    let layering = layering::layer(&g).unwrap();
    let critical = critical_path::analyze(&g, &layering);

    assert_eq!(critical.path, vec!["a", "b"]);
    assert_eq!(critical.total, u64::MAX);
}

#[test]
fn test_layer_makespan_saturates() {
    assert_eq!(layer_makespan(vec![u64::MAX, 1, 1], 2), u64::MAX);
    assert_eq!(layer_makespan(vec![u64::MAX - 1, 5], 1), u64::MAX);
}

#[test]
fn test_layering_and_validator_agree_on_cycles() {
    let cyclic = graph(&[("a", 1), ("b", 1), ("c", 1)], &[("a", "b"), ("b", "c"), ("c", "b")]);
    let acyclic = graph(&[("a", 1), ("b", 1), ("c", 1)], &[("a", "b"), ("b", "c"), ("a", "c")]);

    let report = validate(&cyclic);
    assert!(!report.is_valid());
    match layering::layer(&cyclic) {
        Err(GraphError::Cycle { path }) => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"b".to_string()));
            assert!(path.contains(&"c".to_string()));
            assert!(!path.contains(&"a".to_string()));
        }
        other => panic!("expected cycle, got {other:?}"),
    }

    assert!(validate(&acyclic).is_valid());
    assert!(layering::layer(&acyclic).is_ok());
}

// =========================================================================
// Optimizer
// =========================================================================

fn reachability(graph: &Graph) -> Vec<(String, std::collections::BTreeSet<String>)> {
    let adj = graph.adjacency();
    graph
        .node_ids()
        .into_iter()
        .map(|id| {
            let reach = adj.reachable_from(&id);
            (id, reach)
        })
        .collect()
}

#[test]
fn test_optimizer_keeps_fan_out() {
    let mut g = graph(&[("A", 1), ("B", 1), ("C", 1)], &[("A", "B"), ("A", "C")]);
    let removed = optimizer::optimize(&mut g);

    assert!(removed.is_empty());
    assert_eq!(g.edges.len(), 2);
}

#[test]
fn test_optimizer_drops_transitive_edge() {
    let mut g = graph(
        &[("a", 1), ("b", 1), ("c", 1)],
        &[("a", "b"), ("b", "c"), ("a", "c")],
    );
    let before = reachability(&g);

    let removed = optimizer::optimize(&mut g);
    assert_eq!(removed, vec![GraphEdge::control("a", "c")]);
    assert!(!has_edge(&g, "a", "c"));
    assert_eq!(reachability(&g), before);
}

#[test]
fn test_optimizer_keeps_data_edges() {
    let mut g = graph(&[("a", 1), ("b", 1), ("c", 1)], &[("a", "b"), ("b", "c")]);
    if let Some(n) = g.node_mut("a") {
        n.outputs.push(PortSpec::optional("artifact"));
    }
    if let Some(n) = g.node_mut("c") {
        n.inputs.push(PortSpec::required("artifact"));
    }
    g.add_edge(GraphEdge::new("a", "artifact", "c", "artifact"));

    let removed = optimizer::optimize(&mut g);
    assert!(removed.is_empty());
    assert_eq!(g.edges.len(), 3);
}

#[test]
fn test_optimizer_is_idempotent() {
    let mut g = graph(
        &[("a", 1), ("b", 1), ("c", 1), ("d", 1)],
        &[
            ("a", "b"),
            ("a", "c"),
            ("a", "d"),
            ("b", "d"),
            ("c", "d"),
            ("b", "c"),
        ],
    );
    g.edges.push(GraphEdge::control("a", "b"));
    let before = reachability(&g);

    let first = optimizer::optimize(&mut g);
    assert!(!first.is_empty());
    let edges_after_first = g.edges.clone();

    let second = optimizer::optimize(&mut g);
    assert!(second.is_empty());
    assert_eq!(g.edges, edges_after_first);
    assert_eq!(reachability(&g), before);
}

// =========================================================================
// Planner
// =========================================================================

#[test]
fn test_plan_response_shape() {
    let mut planner = Planner::default();
    let response = planner
        .plan_tasks(&pipeline_tasks(), &Requirement::default())
        .unwrap();

    assert_eq!(response.stats.total_nodes, 4);
    assert_eq!(response.stats.total_edges, response.graph.edges.len());
    assert_eq!(response.layers.len(), 3);
    assert_eq!(response.stats.max_parallelism, 2);
    assert_eq!(
        response.critical_path,
        vec!["checkout@1.0.0", "build@1.0.0", "unit@1.0.0"]
    );
    assert_eq!(response.stats.estimated_time, 18);
    assert_eq!(response.stats.critical_path_length, 3);
    assert_eq!(response.content_hash, content_hash(&response.graph));
    assert_eq!(
        response.graph.metadata.content_hash.as_deref(),
        Some(response.content_hash.as_str())
    );
    assert!(!response.cached);
    assert!(!response.budget_exceeded);
}

#[test]
fn test_plan_rewrites_positions_to_layers() {
    let mut planner = Planner::default();
    let response = planner
        .plan_tasks(&pipeline_tasks(), &Requirement::default())
        .unwrap();

    let docs = response.graph.node("docs@1.0.0").unwrap();
    assert_eq!(docs.position, Position { x: 1, y: 1 });
    let unit = response.graph.node("unit@1.0.0").unwrap();
    assert_eq!(unit.position, Position { x: 2, y: 0 });
}

#[test]
fn test_plan_second_request_hits_cache() {
    let mut planner = Planner::default();
    let first = planner
        .plan_tasks(&pipeline_tasks(), &Requirement::default())
        .unwrap();
    let second = planner
        .plan_tasks(&pipeline_tasks(), &Requirement::default())
        .unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.layers, second.layers);
    assert_eq!(planner.cache().len(), 1);
}

#[test]
fn test_cache_invalidate_and_clear() {
    let mut planner = Planner::default();
    let g = graph(&[("a", 1)], &[]);
    let hash = content_hash(&g);

    let (_, cached) = planner.schedule(&g).unwrap();
    assert!(!cached);
    assert!(planner.cache_mut().invalidate(&hash));
    let (_, cached) = planner.schedule(&g).unwrap();
    assert!(!cached);
    let (_, cached) = planner.schedule(&g).unwrap();
    assert!(cached);

    planner.cache_mut().clear();
    assert!(planner.cache().is_empty());
}

#[test]
fn test_cache_evicts_oldest_entry() {
    let mut cache = PlanCache::new(2);
    for id in ["a", "b", "c"] {
        let g = graph(&[(id, 1)], &[]);
        let schedule = compute_schedule(&g).unwrap();
        cache.insert(content_hash(&g), schedule);
    }

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&content_hash(&graph(&[("a", 1)], &[]))).is_none());
    assert!(cache.get(&content_hash(&graph(&[("c", 1)], &[]))).is_some());
}

#[test]
fn test_plan_graph_rejects_cycle() {
    let mut planner = Planner::default();
    let g = graph(&[("a", 1), ("b", 1)], &[("a", "b"), ("b", "a")]);

    let result = planner.plan_graph(g, &Constraints::default());
    assert!(matches!(result, Err(PlanError::Invalid(_))));
    assert!(planner.cache().is_empty());
}

#[test]
fn test_estimated_time_with_parallelism_cap() {
    let mut planner = Planner::default();
    let g = graph(
        &[("a", 2), ("b", 5), ("c", 4), ("d", 3)],
        &[("a", "b"), ("a", "c"), ("a", "d")],
    );

    let unlimited = planner.plan_graph(g.clone(), &Constraints::default()).unwrap();
    assert_eq!(unlimited.stats.estimated_time, 7);

    let capped = planner
        .plan_graph(
            g,
            &Constraints {
                max_parallelism: Some(2),
                time_budget: Some(8),
            },
        )
        .unwrap();
    // Layer 1 packs 5 | 4+3 on two slots
    assert_eq!(capped.stats.estimated_time, 9);
    assert!(capped.budget_exceeded);
}

#[test]
fn test_layer_makespan_packs_longest_first() {
    assert_eq!(layer_makespan(vec![5, 4, 3, 3], 2), 8);
    assert_eq!(layer_makespan(vec![5, 4, 3], 1), 12);
    assert_eq!(layer_makespan(vec![], 3), 0);
    assert_eq!(layer_makespan(vec![7, 1], 0), 8);
}

#[test]
fn test_plan_unknown_task() {
    let mut planner = Planner::default();
    let store = TaskStore::new();
    let request = PlanRequest {
        name: None,
        tasks: vec!["ghost".to_string()],
        requirement: Requirement::default(),
    };

    let result = planner.plan(&request, &store);
    assert_eq!(
        result,
        Err(PlanError::Build(BuildError::UnknownTask {
            name: "ghost".to_string()
        }))
    );
}
