//! Configuration loaded from `config.toml`.
//!
//! ```toml
//! [execution]
//! max_concurrency = 4
//! default_timeout_secs = 1800
//!
//! [retry.default]
//! max_attempts = 3
//! backoff = "exponential"
//! initial_delay_secs = 30
//! max_delay_secs = 300
//!
//! [retry.category.testing]
//! max_attempts = 5
//! backoff = "fibonacci"
//!
//! [timeouts.node."deploy@1.0.0"]
//! secs = 600
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{GraphNode, RetryPolicy};
use crate::plan::cache::DEFAULT_CACHE_CAPACITY;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "TRELLIS_CONFIG";

/// Default maximum number of simultaneously running nodes
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub planning: PlanningSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,
    /// Review rejections allowed before a node fails; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_review_rounds: Option<u32>,
    /// Seed for retry jitter, for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_seed: Option<u64>,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_timeout_secs: None,
            max_review_rounds: None,
            jitter_seed: None,
        }
    }
}

/// Retry policies: node override, then category, then default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub default: RetryPolicy,
    /// Keyed by category name (`testing`, `review`, ...)
    #[serde(default)]
    pub category: BTreeMap<String, RetryPolicy>,
    /// Keyed by node id (`name@version`)
    #[serde(default)]
    pub node: BTreeMap<String, RetryPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default)]
    pub category: BTreeMap<String, TimeoutSpec>,
    #[serde(default)]
    pub node: BTreeMap<String, TimeoutSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSettings {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&config_content).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, else `$TRELLIS_CONFIG`, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(value) if !value.is_empty() => Self::load(&PathBuf::from(value)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.max_concurrency == 0 {
            bail!("execution.max_concurrency must be at least 1");
        }

        let policies = std::iter::once(("default", &self.retry.default))
            .chain(self.retry.category.iter().map(|(k, v)| (k.as_str(), v)))
            .chain(self.retry.node.iter().map(|(k, v)| (k.as_str(), v)));
        for (key, policy) in policies {
            if policy.max_attempts == 0 {
                bail!("retry policy '{key}': max_attempts must be at least 1");
            }
            if policy.initial_delay > policy.max_delay {
                bail!("retry policy '{key}': initial_delay_secs exceeds max_delay_secs");
            }
            if let Some(jitter) = policy.jitter {
                if !(0.0..=1.0).contains(&jitter) {
                    bail!("retry policy '{key}': jitter must be within 0.0..=1.0");
                }
            }
        }

        Ok(())
    }

    pub fn retry_policy_for(&self, node: &GraphNode) -> &RetryPolicy {
        self.retry
            .node
            .get(&node.id)
            .or_else(|| self.retry.category.get(&node.category.to_string()))
            .unwrap_or(&self.retry.default)
    }

    pub fn timeout_for(&self, node: &GraphNode) -> Option<Duration> {
        self.timeouts
            .node
            .get(&node.id)
            .or_else(|| self.timeouts.category.get(&node.category.to_string()))
            .map(|t| t.secs)
            .or(self.execution.default_timeout_secs)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackoffKind, Category};
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[execution]
max_concurrency = 2
default_timeout_secs = 60
max_review_rounds = 2

[retry.default]
max_attempts = 3
backoff = "linear"
initial_delay_secs = 5
max_delay_secs = 50

[retry.category.testing]
max_attempts = 5
backoff = "fibonacci"

[retry.node."deploy@1.0.0"]
max_attempts = 1

[timeouts.category.testing]
secs = 120

[timeouts.node."deploy@1.0.0"]
secs = 600
"#;

    #[test]
    fn test_resolution_order() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        let build = GraphNode::new("build@1.0.0", Category::Execution, 1);
        let tests = GraphNode::new("tests@1.0.0", Category::Testing, 1);
        let deploy = GraphNode::new("deploy@1.0.0", Category::Utility, 1);

        assert_eq!(config.retry_policy_for(&build).backoff, BackoffKind::Linear);
        assert_eq!(config.retry_policy_for(&tests).max_attempts, 5);
        assert_eq!(config.retry_policy_for(&deploy).max_attempts, 1);

        assert_eq!(config.timeout_for(&build), Some(Duration::from_secs(60)));
        assert_eq!(config.timeout_for(&tests), Some(Duration::from_secs(120)));
        assert_eq!(config.timeout_for(&deploy), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.execution.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        let node = GraphNode::new("a@1.0.0", Category::Setup, 1);
        assert_eq!(config.timeout_for(&node), None);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config: Config = toml::from_str("[retry.default]\nmax_attempts = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &path);
        let config = Config::load_or_default(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.execution.max_concurrency, 2);
    }

    #[test]
    #[serial]
    fn test_load_without_env_uses_defaults() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let config = Config::load_or_default(None).unwrap();
        assert_eq!(config, Config::default());
    }
}
