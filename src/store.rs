//! Explicit store of loaded task specs.
//!
//! Components that need task specs receive a `TaskStore` instead of reading a
//! process-wide cache, so loading and invalidation are visible at call sites.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::models::TaskSpec;
use crate::validation::validate_task;

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    /// Keyed by task name; the latest inserted version wins
    tasks: BTreeMap<String, TaskSpec>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.toml`, `.yaml`/`.yml` and `.json` task file in `dir`.
    ///
    /// Returns the number of tasks loaded. Files with other extensions are
    /// skipped; a file that fails to parse or validate aborts the load.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read task directory: {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let mut loaded = 0;
        for path in entries {
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(ext, "toml" | "yaml" | "yml" | "json") {
                continue;
            }
            let task = load_task_file(&path)?;
            debug!(task = %task.id(), path = %path.display(), "loaded task spec");
            self.insert(task)?;
            loaded += 1;
        }

        info!(count = loaded, dir = %dir.display(), "task store loaded");
        Ok(loaded)
    }

    /// Insert a task after validating it.
    pub fn insert(&mut self, task: TaskSpec) -> Result<()> {
        validate_task(&task).with_context(|| format!("Invalid task spec '{}'", task.name))?;
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks
            .get(name)
            .or_else(|| self.tasks.values().find(|t| t.id() == name))
    }

    /// Resolve a selection (task names or `name@version` ids) in order.
    pub fn select(&self, names: &[String]) -> Result<Vec<TaskSpec>, BuildError> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| BuildError::UnknownTask { name: name.clone() })
            })
            .collect()
    }

    /// Drop a task; returns whether it was present.
    pub fn invalidate(&mut self, name: &str) -> bool {
        let removed = self.tasks.remove(name).is_some();
        if removed {
            debug!(task = name, "task spec invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Parse a single task spec file, picking the format from its extension.
pub fn load_task_file(path: &Path) -> Result<TaskSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;

    let task = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML task: {}", path.display()))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML task: {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON task: {}", path.display()))?,
    };

    Ok(task)
}
