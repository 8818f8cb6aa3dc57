//! The `NodeResourceTopology` cluster object and NUMA annotation keys.
//!
//! Every node publishing NUMA topology carries one cluster-scoped
//! `NodeResourceTopology` object (same name as the node) describing its
//! manager policies and per-zone allocatable/reserved resources. The
//! scheduler's zone choice is persisted back onto pods as a JSON
//! annotation consumed by the node agent that does the actual pinning.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::resource::ResourceList;

/// Pod annotation: per-pod topology awareness override.
pub const ANNOTATION_POD_TOPOLOGY_AWARENESS: &str = "topology.crane.io/topology-awareness";

/// Pod annotation: requested CPU policy.
pub const ANNOTATION_POD_CPU_POLICY: &str = "topology.crane.io/cpu-policy";

/// Pod annotation: the zone list chosen by the scheduler.
pub const ANNOTATION_POD_TOPOLOGY_RESULT: &str = "topology.crane.io/topology-result";

pub const CPU_POLICY_NONE: &str = "none";
pub const CPU_POLICY_EXCLUSIVE: &str = "exclusive";
pub const CPU_POLICY_NUMA: &str = "numa";
pub const CPU_POLICY_IMMOVABLE: &str = "immovable";

/// All CPU policies a pod may request.
pub const SUPPORTED_CPU_POLICIES: [&str; 4] = [
    CPU_POLICY_NONE,
    CPU_POLICY_EXCLUSIVE,
    CPU_POLICY_NUMA,
    CPU_POLICY_IMMOVABLE,
];

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(
    group = "topology.crane.io",
    version = "v1alpha1",
    kind = "NodeResourceTopology",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourceTopologySpec {
    pub crane_manager_policy: ManagerPolicy,
    #[serde(default)]
    pub zones: ZoneList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerPolicy {
    pub cpu_manager_policy: CpuManagerPolicy,
    pub topology_manager_policy: TopologyManagerPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuManagerPolicy {
    Static,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyManagerPolicy {
    SingleNUMANodePodLevel,
    None,
}

pub type ZoneList = Vec<Zone>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneType {
    /// A NUMA node.
    Node,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<ResourceList>,
}

/// Keep only the NUMA-node zones of a list.
pub fn numa_zones(zones: &ZoneList) -> ZoneList {
    zones
        .iter()
        .filter(|z| z.zone_type == ZoneType::Node)
        .cloned()
        .collect()
}
