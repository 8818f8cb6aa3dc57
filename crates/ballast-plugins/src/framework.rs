//! The seam to the host scheduling framework.
//!
//! The host invokes plugins at fixed extension points, passing a
//! per-cycle scratch state. Modelled here as explicit traits so concrete
//! plugins register with the host at startup and tests can drive a full
//! cycle by hand.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};

/// Best possible node score, before cross-node normalisation.
pub const MAX_NODE_SCORE: i64 = 100;

/// Worst possible node score.
pub const MIN_NODE_SCORE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Success,
    /// The node cannot host the pod; other nodes may.
    Unschedulable,
    /// The cycle itself failed.
    Error,
}

/// Outcome of one plugin hook.
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: Code::Success,
            message: String::new(),
        }
    }

    pub fn unschedulable(message: impl Into<String>) -> Self {
        Self {
            code: Code::Unschedulable,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: Code::Error,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }
}

/// A candidate node together with the pods already placed on it.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub node: Node,
    pub pods: Vec<Pod>,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            pods: Vec::new(),
        }
    }

    pub fn with_pods(mut self, pods: Vec<Pod>) -> Self {
        self.pods = pods;
        self
    }

    pub fn name(&self) -> &str {
        self.node.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Per-scheduling-cycle scratch space, keyed by plugin state type.
///
/// One instance exists per (pod, cycle); plugins that need per-node
/// mutation from concurrent Filter calls guard their own state.
#[derive(Default)]
pub struct CycleState {
    slots: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.slots.lock().unwrap().insert(TypeId::of::<T>(), value);
    }

    pub fn read<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.slots
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|slot| slot.downcast::<T>().ok())
    }
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait PreFilterPlugin: Plugin {
    async fn pre_filter(&self, state: &CycleState, pod: &Pod) -> Status;
}

#[async_trait]
pub trait FilterPlugin: Plugin {
    async fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status;
}

#[async_trait]
pub trait ScorePlugin: Plugin {
    async fn score(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> (i64, Status);
}

#[async_trait]
pub trait ReservePlugin: Plugin {
    async fn reserve(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Status;

    /// Roll back a reservation. Idempotent.
    async fn unreserve(&self, state: &CycleState, pod: &Pod, node_name: &str);
}

#[async_trait]
pub trait PreBindPlugin: Plugin {
    async fn pre_bind(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Status;
}

/// Clamp a single-node score into `[min, max]`; the host normalises
/// across nodes afterwards.
pub fn normalize_score(value: i64, max: i64, min: i64) -> i64 {
    value.clamp(min, max)
}
