//! ballast-core — shared domain types for the Ballast scheduling suite.
//!
//! Everything the controller and the scheduler plugins agree on lives
//! here:
//!
//! - **`quantity` / `resource`** — Kubernetes resource arithmetic
//!   (milli-CPU, bytes, scalar resources)
//! - **`annotation`** — the `<value>,<timestamp>` node-annotation codec
//!   with TZ-local stamping and freshness checks
//! - **`policy`** — the `DynamicSchedulerPolicy` document
//!   (`scheduler.policy.crane.io/v1alpha1`) loaded once at startup
//! - **`topology`** — the `NodeResourceTopology` cluster object and the
//!   pod annotation keys used for NUMA placement
//! - **`pod`** — QoS and ownership helpers over `k8s-openapi` pods

pub mod annotation;
pub mod duration;
pub mod pod;
pub mod policy;
pub mod quantity;
pub mod resource;
pub mod topology;

pub use policy::{
    DynamicSchedulerPolicy, HotValuePolicy, PolicyError, PolicySpec, PredicatePolicy,
    PriorityPolicy, SyncPolicy,
};
pub use resource::{Resource, ResourceList};
pub use topology::{
    ManagerPolicy, NodeResourceTopology, NodeResourceTopologySpec, ResourceInfo, Zone, ZoneList,
    ZoneType,
};
