//! ballast-plugins — scheduler extension plugins.
//!
//! The host scheduling framework drives two plugins through a small set
//! of extension-point traits:
//!
//! ```text
//! DynamicScheduler (load-aware)
//!   ├── Filter — reject nodes whose fresh load annotations exceed
//!   │            policy thresholds
//!   └── Score  — spare capacity weighted per policy, minus hotness
//!
//! TopologyMatch (NUMA-aware)
//!   ├── PreFilter — classify target containers, aggregate the request
//!   ├── Filter    — per-zone accounting, single-zone fit when aware
//!   ├── Score     — fewer zones touched scores higher
//!   ├── Reserve   — assume the zone choice (TTL'd cache)
//!   └── PreBind   — persist the choice as a pod annotation
//! ```
//!
//! The framework itself (queueing, node snapshots, binding) is the
//! host's concern; this crate only implements the hooks.

pub mod dynamic;
pub mod framework;
pub mod topology;

pub use dynamic::DynamicScheduler;
pub use framework::{
    normalize_score, Code, CycleState, FilterPlugin, NodeInfo, Plugin, PreBindPlugin,
    PreFilterPlugin, ReservePlugin, ScorePlugin, Status, MAX_NODE_SCORE, MIN_NODE_SCORE,
};
pub use topology::{NrtLister, PodPatcher, PodTopologyCache, TopologyMatch, TopologyMatchArgs};
