//! ballast-annotator — the node annotation controller.
//!
//! A leader-elected control loop that keeps per-node load signals fresh:
//!
//! ```text
//! Controller
//!   ├── NodeWorker × concurrent_syncs
//!   │   ├── RateLimitingQueue (dedup + per-key exponential backoff)
//!   │   ├── annotate load:  MetricsClient → "<value>,<timestamp>" patch
//!   │   └── annotate hot value: BindingRecords → "node_hot_value" patch
//!   ├── EventWorker
//!   │   └── "Scheduled" events → Binding → BindingRecords
//!   ├── one sync ticker per policy metric (re-enqueues every node)
//!   └── minutely BindingRecords GC
//! ```
//!
//! The controller talks to the cluster through the [`cluster::NodeStore`]
//! trait; the kube-backed implementation lives in `ballast-kube`.

pub mod cluster;
pub mod controller;
pub mod error;
pub mod event;
pub mod node;
pub mod queue;
pub mod records;

pub use cluster::{ClusterError, NodeStore, PatchOp};
pub use controller::Controller;
pub use error::AnnotatorError;
pub use queue::RateLimitingQueue;
pub use records::{Binding, BindingRecords};
