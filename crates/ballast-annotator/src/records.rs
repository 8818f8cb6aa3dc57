//! Bounded heap of recent pod-binding events.
//!
//! The hot-value signal only needs recent placement counts, not exact
//! history; bounding the heap caps memory without a bookkeeping thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

/// One observed pod→node scheduling decision. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Binding {
    /// Unix seconds; declared first so the derived ordering is by time.
    pub timestamp: i64,
    pub node: String,
    pub namespace: String,
    pub pod_name: String,
}

/// A min-heap of [`Binding`]s bounded at a fixed capacity, with a
/// garbage-collect horizon. Writers (insert, GC) take the write lock;
/// the hot-value count takes the read side.
pub struct BindingRecords {
    capacity: usize,
    gc_horizon: Duration,
    heap: RwLock<BinaryHeap<Reverse<Binding>>>,
}

impl BindingRecords {
    /// `gc_horizon` should be the widest hot-value time range; zero
    /// disables collection.
    pub fn new(capacity: usize, gc_horizon: Duration) -> Self {
        Self {
            capacity,
            gc_horizon,
            heap: RwLock::new(BinaryHeap::new()),
        }
    }

    /// Insert a binding, evicting the oldest entry when full.
    pub fn add_binding(&self, binding: Binding) {
        let mut heap = self.heap.write().unwrap();
        if heap.len() == self.capacity {
            heap.pop();
        }
        heap.push(Reverse(binding));
    }

    /// How many pods landed on `node` within the trailing `window`.
    pub fn node_binding_count_since(&self, node: &str, window: Duration) -> usize {
        self.node_binding_count_since_at(node, window, Utc::now().timestamp())
    }

    /// Deterministic-time variant for tests.
    pub fn node_binding_count_since_at(&self, node: &str, window: Duration, now: i64) -> usize {
        let heap = self.heap.read().unwrap();
        let timeline = now - window.as_secs() as i64;
        let count = heap
            .iter()
            .filter(|Reverse(b)| b.timestamp > timeline && b.node == node)
            .count();

        debug!(
            total = heap.len(),
            node, count, "counted recent bindings for node"
        );
        count
    }

    /// Drop expired bindings from the root down, stopping at the first
    /// live one. Runs on a minutely tick; no-op when the horizon is zero.
    pub fn gc(&self) {
        self.gc_at(Utc::now().timestamp());
    }

    /// Deterministic-time variant for tests.
    pub fn gc_at(&self, now: i64) {
        if self.gc_horizon.is_zero() {
            return;
        }

        let mut heap = self.heap.write().unwrap();
        let timeline = now - self.gc_horizon.as_secs() as i64;
        while let Some(Reverse(binding)) = heap.pop() {
            if binding.timestamp > timeline {
                heap.push(Reverse(binding));
                return;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
