//! Plan a graph from a request and a directory of task specs
//! Usage: trellis plan <request> --tasks <dir>

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::plan::{PlanCache, PlanRequest, Planner};
use crate::store::TaskStore;

/// Read a planning request from `.json`, `.yaml`/`.yml` or `.toml`.
pub fn load_request(path: &Path) -> Result<PlanRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;

    let request = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse request YAML: {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse request TOML: {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse request JSON: {}", path.display()))?,
    };
    Ok(request)
}

pub fn execute(request_path: &Path, tasks_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let request = load_request(request_path)?;

    let mut store = TaskStore::new();
    let loaded = store.load_dir(tasks_dir)?;
    if loaded == 0 {
        eprintln!(
            "{} no task specs found in {}",
            "warning:".yellow().bold(),
            tasks_dir.display()
        );
    }

    let mut planner = Planner::new(PlanCache::new(config.planning.cache_capacity));
    let response = planner
        .plan(&request, &store)
        .context("Failed to plan request")?;

    for warning in &response.warnings {
        eprintln!("{} {warning}", "warning:".yellow().bold());
    }
    if response.budget_exceeded {
        eprintln!(
            "{} estimated time {} min exceeds the time budget",
            "warning:".yellow().bold(),
            response.stats.estimated_time
        );
    }

    let json = serde_json::to_string_pretty(&response).context("Failed to encode plan")?;
    println!("{json}");
    Ok(())
}
