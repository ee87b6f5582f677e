//! Graph IR inspection
//! Usage: trellis [validate|hash|schedule] <graph.json>

use anyhow::{bail, Result};
use colored::{ColoredString, Colorize};
use std::path::Path;

use super::load_graph;
use crate::models::Category;
use crate::plan::{self, canonical, validator};

fn category_marker(category: Category) -> ColoredString {
    match category {
        Category::Setup => "setup".cyan(),
        Category::Execution => "execution".blue(),
        Category::Testing => "testing".magenta(),
        Category::Integration => "integration".yellow(),
        Category::Review => "review".yellow(),
        Category::Utility => "utility".white().dimmed(),
    }
}

pub fn validate(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    let report = validator::validate(&graph);

    for error in &report.errors {
        println!("{} {error}", "error:".red().bold());
    }
    for warning in &report.warnings {
        println!("{} {warning}", "warning:".yellow().bold());
    }

    if !report.is_valid() {
        bail!("graph has {} validation error(s)", report.errors.len());
    }

    println!(
        "{} {} nodes, {} edges",
        "✓ valid".green().bold(),
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(())
}

pub fn hash(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    println!("{}", canonical::content_hash(&graph));
    Ok(())
}

pub fn schedule(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    let schedule = plan::compute_schedule(&graph)?;

    for warning in &schedule.warnings {
        eprintln!("{} {warning}", "warning:".yellow().bold());
    }

    println!("{}", "Layers".bold());
    for (index, layer) in schedule.layering.layers.iter().enumerate() {
        let nodes: Vec<String> = layer
            .iter()
            .map(|id| match graph.node(id) {
                Some(node) => format!("{id} ({}, {} min)", category_marker(node.category), node.duration),
                None => id.clone(),
            })
            .collect();
        println!("  {index}: {}", nodes.join(", "));
    }

    println!();
    println!(
        "{} {}",
        "Max parallelism:".bold(),
        schedule.layering.max_parallelism
    );
    println!(
        "{} {} ({} min)",
        "Critical path:".bold(),
        schedule.critical_path.path.join(" → "),
        schedule.critical_path.total
    );

    let removed = graph.edges.len().saturating_sub(schedule.optimized_edges.len());
    if removed > 0 {
        println!("{} {removed} redundant edge(s)", "Optimizer:".bold());
    }
    Ok(())
}
