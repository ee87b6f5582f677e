//! Retry backoff delays.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::models::{BackoffKind, RetryPolicy};

/// Whether another attempt is allowed after `error_count` errors.
pub fn has_budget(policy: &RetryPolicy, error_count: u32) -> bool {
    error_count < policy.max_attempts
}

/// Base delay before retry number `retry` (1-based), capped at `max_delay`.
///
/// With `initial_delay = 30`, retries 1..=5 wait:
/// - linear: 30, 60, 90, 120, 150
/// - exponential: 30, 60, 120, 240, 480
/// - fibonacci: 30, 30, 60, 90, 150
pub fn base_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    if retry == 0 {
        return Duration::from_secs(0);
    }

    let multiplier = match policy.backoff {
        BackoffKind::Linear => u64::from(retry),
        BackoffKind::Exponential => 2u64.saturating_pow(retry - 1),
        BackoffKind::Fibonacci => fibonacci(retry),
    };

    let secs = policy
        .initial_delay
        .saturating_mul(multiplier)
        .min(policy.max_delay);
    Duration::from_secs(secs)
}

/// Delay with the policy's jitter applied, still capped at `max_delay`.
pub fn delay_with_jitter(policy: &RetryPolicy, retry: u32, rng: &mut impl Rng) -> Duration {
    let base = base_delay(policy, retry);
    let Some(jitter) = policy.jitter.filter(|j| *j > 0.0) else {
        return base;
    };

    let spread = jitter.min(1.0);
    let factor = 1.0 + rng.gen_range(-spread..=spread);
    let secs = (base.as_secs_f64() * factor).clamp(0.0, policy.max_delay as f64);
    Duration::from_secs_f64(secs)
}

/// Instant at which a retry becomes due, or `None` for an immediate retry.
pub fn retry_at(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    if delay.is_zero() {
        return None;
    }
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

/// Whether `not_before` has passed.
pub fn is_backoff_elapsed(not_before: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    not_before.map_or(true, |t| now >= t)
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}
