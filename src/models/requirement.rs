//! Structured requirement object handed to the planner.
//!
//! Extraction of this object from free text happens upstream; the planner
//! only reads the feature list, constraints and dependency hints.

use serde::{Deserialize, Serialize};

use super::task::{Category, TaskSpec};

/// Matches tasks either by category or by task name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selector {
    Category(Category),
    Task(String),
}

impl Selector {
    pub fn matches(&self, task: &TaskSpec) -> bool {
        match self {
            Selector::Category(category) => task.category == *category,
            Selector::Task(name) => task.name == *name || task.id() == *name,
        }
    }
}

/// "`after` follows `before`", e.g. deployment follows testing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHint {
    pub before: Selector,
    pub after: Selector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Upper bound on simultaneously running nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<usize>,
    /// Time budget in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub hints: Vec<DependencyHint>,
}
