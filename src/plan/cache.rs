//! Schedules keyed by graph content hash.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::error::OrderingWarning;
use crate::models::GraphEdge;

use super::critical_path::CriticalPath;
use super::layering::Layering;

/// Default number of cached schedules
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Everything derived from a validated graph that does not depend on
/// anything but its canonical content.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub layering: Layering,
    pub critical_path: CriticalPath,
    pub warnings: Vec<OrderingWarning>,
    /// Edge set after optimization, in canonical order
    pub optimized_edges: Vec<GraphEdge>,
}

/// Bounded cache; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct PlanCache {
    capacity: usize,
    entries: HashMap<String, Schedule>,
    order: VecDeque<String>,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, hash: &str) -> Option<&Schedule> {
        self.entries.get(hash)
    }

    pub fn insert(&mut self, hash: String, schedule: Schedule) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(hash.clone(), schedule).is_none() {
            self.order.push_back(hash);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            debug!(hash = %oldest, "evicting cached schedule");
            self.entries.remove(&oldest);
        }
    }

    pub fn invalidate(&mut self, hash: &str) -> bool {
        self.order.retain(|h| h != hash);
        self.entries.remove(hash).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
