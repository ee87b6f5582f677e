pub mod graph;
pub mod plan;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::models::Graph;

/// Read a graph IR document from a JSON file.
pub fn load_graph(path: &Path) -> Result<Graph> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse graph file: {}", path.display()))
}
