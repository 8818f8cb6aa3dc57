//! The NUMA-topology-aware scheduler plugin.

mod cache;
mod plugin;
mod zones;

pub use cache::{CacheError, PodTopologyCache, DEFAULT_ASSUME_TTL};
pub use plugin::{
    NrtLister, PatchError, PodPatcher, TopologyMatch, TopologyMatchArgs,
    ERR_REASON_FAILED_TO_GET_NRT, ERR_REASON_NUMA_RESOURCE_NOT_ENOUGH, NAME,
};
