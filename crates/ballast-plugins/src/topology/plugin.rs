//! Extension-point hooks of the NUMA topology plugin.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::debug;

use ballast_core::pod::{
    guaranteed_cpus, is_daemonset_pod, is_guaranteed, pod_cpu_policy, pod_key,
    pod_topology_awareness,
};
use ballast_core::resource::{Resource, RESOURCE_CPU};
use ballast_core::topology::{
    CpuManagerPolicy, NodeResourceTopology, TopologyManagerPolicy, ZoneList,
    ANNOTATION_POD_TOPOLOGY_RESULT, CPU_POLICY_NONE,
};

use crate::framework::{
    CycleState, FilterPlugin, NodeInfo, Plugin, PreBindPlugin, PreFilterPlugin, ReservePlugin,
    ScorePlugin, Status, MAX_NODE_SCORE,
};

use super::cache::{PodTopologyCache, DEFAULT_ASSUME_TTL};
use super::zones::{assign_topology_result, NodeWrapper};

pub const NAME: &str = "NodeResourceTopologyMatch";

pub const ERR_REASON_NUMA_RESOURCE_NOT_ENOUGH: &str =
    "node(s) had insufficient resource of NUMA node";
pub const ERR_REASON_FAILED_TO_GET_NRT: &str = "node(s) failed to get NRT";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("pod patch failed: {0}")]
    Api(String),
}

/// Read access to the cluster's `NodeResourceTopology` objects.
pub trait NrtLister: Send + Sync {
    fn get(&self, node_name: &str) -> Option<NodeResourceTopology>;
}

/// Writes the chosen zone list onto the pod at PreBind.
#[async_trait]
pub trait PodPatcher: Send + Sync {
    async fn patch_pod_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PatchError>;
}

/// Plugin arguments, loaded once at init.
#[derive(Debug, Clone)]
pub struct TopologyMatchArgs {
    /// Resources whose requests are accounted per NUMA zone.
    pub topology_aware_resources: Vec<String>,
}

impl Default for TopologyMatchArgs {
    fn default() -> Self {
        Self {
            topology_aware_resources: vec![RESOURCE_CPU.to_string()],
        }
    }
}

/// Cycle-scoped scratch seeded at PreFilter.
struct TopologyState {
    /// Per-pod awareness override, when the annotation is set.
    aware: Option<bool>,
    /// Containers that drive NUMA accounting. Empty ⇒ plugin inactive
    /// for this pod.
    target_indices: Vec<usize>,
    /// Their aggregated request, restricted to the aware resources.
    request: Resource,
    /// Filter output per candidate node; filters run concurrently.
    by_node: Mutex<HashMap<String, NodeWrapper>>,
    /// The winning node's zone list, copied out at Reserve.
    result: Mutex<ZoneList>,
}

/// NUMA-topology plugin: a simplified admit pass of the kubelet's
/// topology manager, run at scheduling time.
pub struct TopologyMatch {
    cache: Arc<PodTopologyCache>,
    nrt: Arc<dyn NrtLister>,
    pods: Arc<dyn PodPatcher>,
    aware_resources: BTreeSet<String>,
}

impl TopologyMatch {
    pub fn new(args: TopologyMatchArgs, nrt: Arc<dyn NrtLister>, pods: Arc<dyn PodPatcher>) -> Self {
        Self {
            cache: Arc::new(PodTopologyCache::new(DEFAULT_ASSUME_TTL)),
            nrt,
            pods,
            aware_resources: args.topology_aware_resources.into_iter().collect(),
        }
    }

    /// The assumption cache, for wiring the expiry sweeper.
    pub fn cache(&self) -> Arc<PodTopologyCache> {
        Arc::clone(&self.cache)
    }

    /// Containers whose CPUs could be pinned: Guaranteed pods not opting
    /// out via the `none` CPU policy, counting only containers with an
    /// integral CPU request.
    fn target_container_indices(pod: &Pod) -> Vec<usize> {
        if pod_cpu_policy(pod) == Some(CPU_POLICY_NONE) {
            return Vec::new();
        }
        if !is_guaranteed(pod) {
            return Vec::new();
        }
        let Some(spec) = pod.spec.as_ref() else {
            return Vec::new();
        };
        spec.containers
            .iter()
            .enumerate()
            .filter(|(_, container)| guaranteed_cpus(container) > 0)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Aggregate the target containers' requests, restricted to the
    /// topology-aware resources.
    fn container_request(&self, pod: &Pod, indices: &[usize]) -> Resource {
        let mut request = Resource::new();
        let Some(spec) = pod.spec.as_ref() else {
            return request;
        };
        for &idx in indices {
            let Some(container) = spec.containers.get(idx) else {
                continue;
            };
            let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref())
            else {
                continue;
            };
            let aware: ballast_core::resource::ResourceList = requests
                .iter()
                .filter(|(name, _)| self.aware_resources.contains(name.as_str()))
                .map(|(name, quantity)| (name.clone(), quantity.clone()))
                .collect();
            request.add_list(&aware);
        }
        request
    }
}

impl Plugin for TopologyMatch {
    fn name(&self) -> &'static str {
        NAME
    }
}

#[async_trait]
impl PreFilterPlugin for TopologyMatch {
    async fn pre_filter(&self, state: &CycleState, pod: &Pod) -> Status {
        let indices = if self.aware_resources.contains(RESOURCE_CPU) {
            Self::target_container_indices(pod)
        } else {
            Vec::new()
        };
        let request = self.container_request(pod, &indices);

        state.write(Arc::new(TopologyState {
            aware: pod_topology_awareness(pod),
            target_indices: indices,
            request,
            by_node: Mutex::new(HashMap::new()),
            result: Mutex::new(ZoneList::new()),
        }));
        Status::success()
    }
}

#[async_trait]
impl FilterPlugin for TopologyMatch {
    /// Check that some NUMA zone (or combination) can host the request,
    /// and stash the tentative assignment for Reserve.
    async fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let Some(s) = state.read::<TopologyState>() else {
            return Status::error("topology state missing from scheduling cycle");
        };

        if is_daemonset_pod(pod) || s.target_indices.is_empty() {
            return Status::success();
        }

        let node_name = node_info.name();
        let Some(nrt) = self.nrt.get(node_name) else {
            return Status::unschedulable(ERR_REASON_FAILED_TO_GET_NRT);
        };

        // The kubelet still owns the cpuset on non-static nodes.
        if nrt.spec.crane_manager_policy.cpu_manager_policy != CpuManagerPolicy::Static {
            return Status::success();
        }

        let mut wrapper = NodeWrapper::new(node_name, &nrt.spec.zones);
        for resident in &node_info.pods {
            wrapper.add_pod(resident, |p| self.cache.get_pod_topology(&pod_key(p)));
        }
        wrapper.aware = s.aware.unwrap_or_else(|| {
            nrt.spec.crane_manager_policy.topology_manager_policy
                == TopologyManagerPolicy::SingleNUMANodePodLevel
        });

        if wrapper.aware && !wrapper.retain_single_zone_candidates(&s.request) {
            return Status::unschedulable(ERR_REASON_NUMA_RESOURCE_NOT_ENOUGH);
        }

        assign_topology_result(&mut wrapper, s.request.clone());
        debug!(
            node = node_name,
            zones = wrapper.result.len(),
            aware = wrapper.aware,
            "assigned tentative topology result"
        );

        s.by_node
            .lock()
            .unwrap()
            .insert(node_name.to_string(), wrapper);
        Status::success()
    }
}

#[async_trait]
impl ScorePlugin for TopologyMatch {
    /// Fewer zones touched scores higher; single-zone placements win.
    async fn score(&self, state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> (i64, Status) {
        let Some(s) = state.read::<TopologyState>() else {
            return (0, Status::success());
        };
        let by_node = s.by_node.lock().unwrap();
        match by_node.get(node_info.name()) {
            Some(wrapper) if !wrapper.result.is_empty() => (
                MAX_NODE_SCORE / wrapper.result.len() as i64,
                Status::success(),
            ),
            _ => (0, Status::success()),
        }
    }
}

#[async_trait]
impl ReservePlugin for TopologyMatch {
    async fn reserve(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Status {
        let Some(s) = state.read::<TopologyState>() else {
            return Status::error("topology state missing from scheduling cycle");
        };

        let result = {
            let by_node = s.by_node.lock().unwrap();
            let Some(wrapper) = by_node.get(node_name) else {
                // This pod needed no NUMA accounting on this node.
                return Status::success();
            };
            if wrapper.result.is_empty() {
                return Status::error("node(s) topology result is empty");
            }
            wrapper.result.clone()
        };

        *s.result.lock().unwrap() = result.clone();
        match self.cache.assume_pod(&pod_key(pod), result) {
            Ok(()) => Status::success(),
            Err(err) => Status::error(err.to_string()),
        }
    }

    async fn unreserve(&self, state: &CycleState, pod: &Pod, node_name: &str) {
        let Some(s) = state.read::<TopologyState>() else {
            return;
        };
        if !s.by_node.lock().unwrap().contains_key(node_name) {
            return;
        }
        self.cache.forget_pod(&pod_key(pod));
    }
}

#[async_trait]
impl PreBindPlugin for TopologyMatch {
    /// Materialise the reservation as a pod annotation for the node
    /// agent.
    async fn pre_bind(&self, state: &CycleState, pod: &Pod, _node_name: &str) -> Status {
        let Some(s) = state.read::<TopologyState>() else {
            return Status::error("topology state missing from scheduling cycle");
        };

        let result = s.result.lock().unwrap().clone();
        if result.is_empty() {
            return Status::success();
        }

        let raw = match serde_json::to_string(&result) {
            Ok(raw) => raw,
            Err(err) => return Status::error(err.to_string()),
        };

        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        match self
            .pods
            .patch_pod_annotation(namespace, name, ANNOTATION_POD_TOPOLOGY_RESULT, &raw)
            .await
        {
            Ok(()) => Status::success(),
            Err(err) => Status::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    use ballast_core::topology::{
        ManagerPolicy, NodeResourceTopologySpec, ResourceInfo, Zone, ZoneType,
        ANNOTATION_POD_CPU_POLICY,
    };

    fn quantity_list(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    fn guaranteed_pod(cpu: &str) -> Pod {
        let resources = ResourceRequirements {
            requests: Some(quantity_list(&[("cpu", cpu), ("memory", "1Gi")])),
            limits: Some(quantity_list(&[("cpu", cpu), ("memory", "1Gi")])),
            ..Default::default()
        };
        let mut pod = Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    resources: Some(resources),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.namespace = Some("default".to_string());
        pod.metadata.name = Some("web-0".to_string());
        pod.metadata.uid = Some("uid-web-0".to_string());
        pod
    }

    #[test]
    fn target_indices_require_guaranteed_integral_cpu() {
        assert_eq!(TopologyMatch::target_container_indices(&guaranteed_pod("2")), vec![0]);
        assert!(TopologyMatch::target_container_indices(&guaranteed_pod("2500m")).is_empty());
        assert!(TopologyMatch::target_container_indices(&Pod::default()).is_empty());

        let mut opted_out = guaranteed_pod("2");
        opted_out.metadata.annotations = Some(
            [(ANNOTATION_POD_CPU_POLICY.to_string(), "none".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(TopologyMatch::target_container_indices(&opted_out).is_empty());
    }

    struct NoNrt;
    impl NrtLister for NoNrt {
        fn get(&self, _node_name: &str) -> Option<NodeResourceTopology> {
            None
        }
    }

    struct NoPatch;
    #[async_trait]
    impl PodPatcher for NoPatch {
        async fn patch_pod_annotation(
            &self,
            _namespace: &str,
            _name: &str,
            _key: &str,
            _value: &str,
        ) -> Result<(), PatchError> {
            Ok(())
        }
    }

    fn nrt_spec(zones: Vec<Zone>, cpu_manager: CpuManagerPolicy) -> NodeResourceTopologySpec {
        NodeResourceTopologySpec {
            crane_manager_policy: ManagerPolicy {
                cpu_manager_policy: cpu_manager,
                topology_manager_policy: TopologyManagerPolicy::SingleNUMANodePodLevel,
            },
            zones,
        }
    }

    fn zone(name: &str, cpu: &str) -> Zone {
        Zone {
            name: name.to_string(),
            zone_type: ZoneType::Node,
            resources: Some(ResourceInfo {
                capacity: None,
                allocatable: Some(quantity_list(&[("cpu", cpu), ("memory", "8Gi")])),
                reserved: None,
            }),
        }
    }

    struct StaticNrt(NodeResourceTopologySpec);
    impl NrtLister for StaticNrt {
        fn get(&self, node_name: &str) -> Option<NodeResourceTopology> {
            Some(NodeResourceTopology::new(node_name, self.0.clone()))
        }
    }

    fn plugin_with(nrt: impl NrtLister + 'static) -> TopologyMatch {
        TopologyMatch::new(TopologyMatchArgs::default(), Arc::new(nrt), Arc::new(NoPatch))
    }

    async fn seeded_state(plugin: &TopologyMatch, pod: &Pod) -> CycleState {
        let state = CycleState::new();
        assert!(plugin.pre_filter(&state, pod).await.is_success());
        state
    }

    #[tokio::test]
    async fn missing_nrt_rejects_node() {
        let plugin = plugin_with(NoNrt);
        let pod = guaranteed_pod("2");
        let state = seeded_state(&plugin, &pod).await;

        let mut node_info = NodeInfo::default();
        node_info.node.metadata.name = Some("worker-1".to_string());

        let status = plugin.filter(&state, &pod, &node_info).await;
        assert_eq!(status.code(), crate::framework::Code::Unschedulable);
        assert_eq!(status.message(), ERR_REASON_FAILED_TO_GET_NRT);
    }

    #[tokio::test]
    async fn non_static_cpu_manager_passes_without_accounting() {
        let plugin = plugin_with(StaticNrt(nrt_spec(
            vec![zone("node0", "4")],
            CpuManagerPolicy::None,
        )));
        let pod = guaranteed_pod("2");
        let state = seeded_state(&plugin, &pod).await;

        let mut node_info = NodeInfo::default();
        node_info.node.metadata.name = Some("worker-1".to_string());

        let status = plugin.filter(&state, &pod, &node_info).await;
        assert!(status.is_success());

        // No wrapper was stored: Reserve is a no-op and Score reads 0.
        let (score, _) = plugin.score(&state, &pod, &node_info).await;
        assert_eq!(score, 0);
        assert!(plugin.reserve(&state, &pod, "worker-1").await.is_success());
        assert_eq!(plugin.cache.pod_count(), 0);
    }

    #[tokio::test]
    async fn aware_pod_rejected_when_no_zone_fits() {
        let plugin = plugin_with(StaticNrt(nrt_spec(
            vec![zone("node0", "1"), zone("node1", "1")],
            CpuManagerPolicy::Static,
        )));
        let pod = guaranteed_pod("2");
        let state = seeded_state(&plugin, &pod).await;

        let mut node_info = NodeInfo::default();
        node_info.node.metadata.name = Some("worker-1".to_string());

        let status = plugin.filter(&state, &pod, &node_info).await;
        assert_eq!(status.code(), crate::framework::Code::Unschedulable);
        assert_eq!(status.message(), ERR_REASON_NUMA_RESOURCE_NOT_ENOUGH);
    }

    #[tokio::test]
    async fn resident_pods_consume_zone_capacity() {
        let plugin = plugin_with(StaticNrt(nrt_spec(
            vec![zone("node0", "4"), zone("node1", "4")],
            CpuManagerPolicy::Static,
        )));
        let pod = guaranteed_pod("2");
        let state = seeded_state(&plugin, &pod).await;

        // A resident pod holds 3 cores of node0 via its annotation.
        let mut resident = guaranteed_pod("3");
        resident.metadata.uid = Some("uid-resident".to_string());
        let reservation = serde_json::json!([
            {"name": "node0", "type": "Node", "resources": {"capacity": {"cpu": "3"}}}
        ]);
        resident.metadata.annotations = Some(
            [(ANNOTATION_POD_TOPOLOGY_RESULT.to_string(), reservation.to_string())]
                .into_iter()
                .collect(),
        );

        let mut node_info = NodeInfo::default();
        node_info.node.metadata.name = Some("worker-1".to_string());
        node_info.pods = vec![resident];

        let status = plugin.filter(&state, &pod, &node_info).await;
        assert!(status.is_success());

        // node1 has the most free CPU and takes the whole request.
        let s = state.read::<TopologyState>().unwrap();
        let by_node = s.by_node.lock().unwrap();
        let wrapper = by_node.get("worker-1").unwrap();
        assert_eq!(wrapper.result.len(), 1);
        assert_eq!(wrapper.result[0].name, "node1");
    }

    #[tokio::test]
    async fn reserve_assumes_and_unreserve_forgets() {
        let plugin = plugin_with(StaticNrt(nrt_spec(
            vec![zone("node0", "4")],
            CpuManagerPolicy::Static,
        )));
        let pod = guaranteed_pod("2");
        let state = seeded_state(&plugin, &pod).await;

        let mut node_info = NodeInfo::default();
        node_info.node.metadata.name = Some("worker-1".to_string());
        assert!(plugin.filter(&state, &pod, &node_info).await.is_success());

        assert!(plugin.reserve(&state, &pod, "worker-1").await.is_success());
        assert_eq!(plugin.cache.pod_count(), 1);

        // Double-reserve of the same pod key fails.
        let status = plugin.reserve(&state, &pod, "worker-1").await;
        assert_eq!(status.code(), crate::framework::Code::Error);

        plugin.unreserve(&state, &pod, "worker-1").await;
        assert_eq!(plugin.cache.pod_count(), 0);
        plugin.unreserve(&state, &pod, "worker-1").await;
    }
}
