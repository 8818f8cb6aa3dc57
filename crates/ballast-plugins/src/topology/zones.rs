//! Per-node NUMA zone accounting and the assignment algorithm.

use k8s_openapi::api::core::v1::Pod;

use ballast_core::pod::pod_numa_result;
use ballast_core::resource::Resource;
use ballast_core::topology::{ResourceInfo, Zone, ZoneList, ZoneType};

/// One NUMA zone's ledger: what the kubelet reports allocatable and what
/// resident pods have already reserved.
#[derive(Debug, Clone)]
pub(crate) struct NumaZone {
    pub name: String,
    pub allocatable: Resource,
    pub requested: Resource,
}

impl NumaZone {
    fn from_zone(zone: &Zone) -> Self {
        let mut allocatable = Resource::new();
        if let Some(list) = zone.resources.as_ref().and_then(|r| r.allocatable.as_ref()) {
            allocatable.add_list(list);
        }
        Self {
            name: zone.name.clone(),
            allocatable,
            requested: Resource::new(),
        }
    }

    pub fn free_milli_cpu(&self) -> i64 {
        self.allocatable.milli_cpu - self.requested.milli_cpu
    }
}

/// Scratch accounting for one candidate node during a cycle.
#[derive(Debug, Clone)]
pub(crate) struct NodeWrapper {
    pub node: String,
    pub aware: bool,
    pub zones: Vec<NumaZone>,
    pub result: ZoneList,
}

impl NodeWrapper {
    pub fn new(node: &str, zones: &ZoneList) -> Self {
        Self {
            node: node.to_string(),
            aware: false,
            zones: zones
                .iter()
                .filter(|z| z.zone_type == ZoneType::Node)
                .map(NumaZone::from_zone)
                .collect(),
            result: ZoneList::new(),
        }
    }

    /// Charge a resident pod's NUMA reservation to the ledger. The
    /// persisted annotation wins; pods not yet bound fall back to the
    /// assumption lookup.
    pub fn add_pod<F>(&mut self, pod: &Pod, assumed: F)
    where
        F: Fn(&Pod) -> Option<ZoneList>,
    {
        let mut reservation = pod_numa_result(pod);
        if reservation.is_empty() {
            match assumed(pod) {
                Some(zones) => reservation = zones,
                None => return,
            }
        }
        self.add_zone_reservations(&reservation);
    }

    fn add_zone_reservations(&mut self, reservation: &ZoneList) {
        for reserved in reservation {
            let Some(capacity) = reserved.resources.as_ref().and_then(|r| r.capacity.as_ref())
            else {
                continue;
            };
            for zone in &mut self.zones {
                if zone.name == reserved.name {
                    zone.requested.add_list(capacity);
                }
            }
        }
    }

    /// Keep only zones able to satisfy the whole request alone.
    /// Returns false when none can.
    pub fn retain_single_zone_candidates(&mut self, request: &Resource) -> bool {
        self.zones.retain(|zone| fits_request(request, zone));
        !self.zones.is_empty()
    }
}

/// Whether a zone's spare capacity covers the whole request.
pub(crate) fn fits_request(request: &Resource, zone: &NumaZone) -> bool {
    if request.is_empty() {
        return true;
    }
    let allocatable = &zone.allocatable;
    let requested = &zone.requested;

    if request.milli_cpu > allocatable.milli_cpu - requested.milli_cpu {
        return false;
    }
    if request.memory > allocatable.memory - requested.memory {
        return false;
    }
    if request.ephemeral_storage > allocatable.ephemeral_storage - requested.ephemeral_storage {
        return false;
    }
    for (name, quantity) in &request.scalar {
        let free = allocatable.scalar.get(name).unwrap_or(&0)
            - requested.scalar.get(name).unwrap_or(&0);
        if *quantity > free {
            return false;
        }
    }
    true
}

/// Assign as much of `remaining` as the zone has spare. Returns what was
/// taken here and whether the request is now fully placed.
fn assign_request_for_zone(remaining: &mut Resource, zone: &NumaZone) -> (Resource, bool) {
    let mut taken = Resource::new();
    if remaining.is_empty() {
        return (taken, false);
    }

    let mut finished = true;
    let free = |alloc: i64, req: i64| (alloc - req).max(0);

    let assigned = remaining
        .milli_cpu
        .min(free(zone.allocatable.milli_cpu, zone.requested.milli_cpu));
    remaining.milli_cpu -= assigned;
    taken.milli_cpu = assigned;
    if remaining.milli_cpu > 0 {
        finished = false;
    }

    let assigned = remaining
        .memory
        .min(free(zone.allocatable.memory, zone.requested.memory));
    remaining.memory -= assigned;
    taken.memory = assigned;
    if remaining.memory > 0 {
        finished = false;
    }

    let assigned = remaining.ephemeral_storage.min(free(
        zone.allocatable.ephemeral_storage,
        zone.requested.ephemeral_storage,
    ));
    remaining.ephemeral_storage -= assigned;
    taken.ephemeral_storage = assigned;
    if remaining.ephemeral_storage > 0 {
        finished = false;
    }

    for (name, quantity) in remaining.scalar.iter_mut() {
        let spare = free(
            *zone.allocatable.scalar.get(name).unwrap_or(&0),
            *zone.requested.scalar.get(name).unwrap_or(&0),
        );
        let assigned = (*quantity).min(spare);
        *quantity -= assigned;
        taken.scalar.insert(name.clone(), assigned);
        if *quantity > 0 {
            finished = false;
        }
    }

    (taken, finished)
}

/// Decide the tentative zone reservation for the request.
///
/// Aware nodes take the whole request on the zone with the most free
/// CPU. Non-aware nodes may split: allocatable CPU rounds down to whole
/// cores and zones are drained in descending-free-CPU order until the
/// request is placed. The result is sorted by zone name.
pub(crate) fn assign_topology_result(wrapper: &mut NodeWrapper, mut request: Resource) {
    wrapper
        .zones
        .sort_by(|a, b| b.free_milli_cpu().cmp(&a.free_milli_cpu()));

    if wrapper.zones.is_empty() {
        return;
    }

    if wrapper.aware {
        wrapper.result = vec![Zone {
            name: wrapper.zones[0].name.clone(),
            zone_type: ZoneType::Node,
            resources: Some(ResourceInfo {
                capacity: Some(request.to_resource_list()),
                allocatable: None,
                reserved: None,
            }),
        }];
        return;
    }

    for zone in &mut wrapper.zones {
        zone.allocatable.milli_cpu = zone.allocatable.milli_cpu / 1000 * 1000;
        let (taken, finished) = assign_request_for_zone(&mut request, zone);
        let capacity = taken.to_resource_list();
        if !capacity.is_empty() {
            wrapper.result.push(Zone {
                name: zone.name.clone(),
                zone_type: ZoneType::Node,
                resources: Some(ResourceInfo {
                    capacity: Some(capacity),
                    allocatable: None,
                    reserved: None,
                }),
            });
        }
        if finished {
            break;
        }
    }
    wrapper.result.sort_by(|a, b| a.name.cmp(&b.name));
}
