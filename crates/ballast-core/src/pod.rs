//! Pod classification helpers shared by the annotator and the plugins.

use k8s_openapi::api::core::v1::{Container, Pod};

use crate::quantity;
use crate::resource::{RESOURCE_CPU, RESOURCE_MEMORY};
use crate::topology::{
    self, ZoneList, ANNOTATION_POD_CPU_POLICY, ANNOTATION_POD_TOPOLOGY_AWARENESS,
    ANNOTATION_POD_TOPOLOGY_RESULT, SUPPORTED_CPU_POLICIES,
};

pub const DEFAULT_SYSTEM_NAMESPACE: &str = "crane-system";

/// Namespace holding the leader-election lease.
pub fn system_namespace() -> String {
    std::env::var("CRANE_SYSTEM_NAMESPACE").unwrap_or_else(|_| DEFAULT_SYSTEM_NAMESPACE.to_string())
}

/// DaemonSet pods are placed by their controller on every node; load
/// gates must not reject them.
pub fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.kind == "DaemonSet")
}

/// Cache key for a pod: UID when set, `namespace/name` otherwise.
pub fn pod_key(pod: &Pod) -> String {
    if let Some(uid) = pod.metadata.uid.as_deref() {
        if !uid.is_empty() {
            return uid.to_string();
        }
    }
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Guaranteed QoS: every container pins CPU and memory with
/// requests == limits.
pub fn is_guaranteed(pod: &Pod) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };
    let mut containers: Vec<&Container> = spec.containers.iter().collect();
    if let Some(init) = spec.init_containers.as_ref() {
        containers.extend(init.iter());
    }
    if containers.is_empty() {
        return false;
    }
    containers.iter().all(|c| container_is_guaranteed(c))
}

fn container_is_guaranteed(container: &Container) -> bool {
    let Some(resources) = container.resources.as_ref() else {
        return false;
    };
    let Some(limits) = resources.limits.as_ref() else {
        return false;
    };
    for name in [RESOURCE_CPU, RESOURCE_MEMORY] {
        let Some(limit) = limits.get(name) else {
            return false;
        };
        if let Some(requests) = resources.requests.as_ref() {
            if let Some(request) = requests.get(name) {
                if request != limit {
                    return false;
                }
            }
        }
    }
    true
}

/// Whole cores a container may pin: its CPU request when integral,
/// zero otherwise (fractional requests cannot be bound to a cpuset).
pub fn guaranteed_cpus(container: &Container) -> i64 {
    let cpu = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get(RESOURCE_CPU));
    let Some(cpu) = cpu else {
        return 0;
    };
    let Some(milli) = quantity::parse_milli(cpu) else {
        return 0;
    };
    if milli % 1000 != 0 {
        return 0;
    }
    milli / 1000
}

/// The CPU policy a pod requests, if it is one we understand.
pub fn pod_cpu_policy(pod: &Pod) -> Option<&str> {
    let policy = pod
        .metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_POD_CPU_POLICY)?
        .as_str();
    SUPPORTED_CPU_POLICIES.contains(&policy).then_some(policy)
}

/// Per-pod topology awareness override; `None` when unset or unparseable.
pub fn pod_topology_awareness(pod: &Pod) -> Option<bool> {
    pod.metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_POD_TOPOLOGY_AWARENESS)?
        .parse()
        .ok()
}

/// A pod's persisted topology result, if any.
pub fn pod_topology_result(pod: &Pod) -> Option<ZoneList> {
    let raw = pod
        .metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_POD_TOPOLOGY_RESULT)?;
    serde_json::from_str(raw).ok()
}

/// The NUMA-node zones of a pod's persisted topology result.
pub fn pod_numa_result(pod: &Pod) -> ZoneList {
    match pod_topology_result(pod) {
        Some(zones) => topology::numa_zones(&zones),
        None => ZoneList::new(),
    }
}
