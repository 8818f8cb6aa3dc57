//! ballast-kube — kube-rs implementations of the cluster seams.
//!
//! The annotator and the plugins consume narrow traits; this crate
//! provides their production implementations:
//!
//! - [`nodes::KubeNodeStore`] — reflector-backed node cache plus
//!   JSON-Patch annotation writes
//! - [`events::spawn_event_feed`] — watch on `Scheduled` events,
//!   forwarded into the annotator's channel
//! - [`nrt::KubeNrtLister`] — reflector-backed `NodeResourceTopology`
//!   cache
//! - [`pods::KubePodPatcher`] — merge-patch pod annotation writes
//! - [`lease::LeaderElection`] — coordination/v1 Lease loop exposing a
//!   leadership `watch` signal

pub mod events;
pub mod lease;
pub mod nodes;
pub mod nrt;
pub mod pods;

pub use events::spawn_event_feed;
pub use lease::{LeaderElection, LeaseConfig, LeaseError};
pub use nodes::KubeNodeStore;
pub use nrt::KubeNrtLister;
pub use pods::KubePodPatcher;
