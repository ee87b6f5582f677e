use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of attempts before a node fails terminally
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in seconds
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 30;

/// Default upper bound on any retry delay, in seconds
pub const DEFAULT_MAX_DELAY_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Linear,
    #[default]
    Exponential,
    Fibonacci,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffKind::Linear => write!(f, "linear"),
            BackoffKind::Exponential => write!(f, "exponential"),
            BackoffKind::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

/// Retry policy applied per node.
///
/// Resolved per node from a node override, then a category policy, then the
/// default policy (see `Config::retry_policy_for`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_delay", rename = "initial_delay_secs")]
    pub initial_delay: u64,
    #[serde(default = "default_max_delay", rename = "max_delay_secs")]
    pub max_delay: u64,
    /// Fraction of the delay (0.0..=1.0) added or removed at random
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY_SECS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_SECS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffKind::default(),
            initial_delay: DEFAULT_INITIAL_DELAY_SECS,
            max_delay: DEFAULT_MAX_DELAY_SECS,
            jitter: None,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, useful for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Linear,
            initial_delay: 0,
            max_delay: 0,
            jitter: None,
        }
    }
}
