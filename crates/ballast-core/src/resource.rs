//! Aggregated resource requests used by the NUMA zone accounting.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::quantity;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// The wire form of a resource map (`requests`, `limits`, zone capacities).
pub type ResourceList = BTreeMap<String, Quantity>;

/// A resource vector in scheduler-native units: milli-CPU, bytes, and
/// opaque scalar counts for everything else (hugepages, devices).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub milli_cpu: i64,
    pub memory: i64,
    pub ephemeral_storage: i64,
    pub scalar: BTreeMap<String, i64>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a resource list into this vector. Unparseable
    /// quantities count as zero.
    pub fn add_list(&mut self, list: &ResourceList) {
        for (name, value) in list {
            match name.as_str() {
                RESOURCE_CPU => {
                    self.milli_cpu += quantity::parse_milli(value).unwrap_or(0);
                }
                RESOURCE_MEMORY => {
                    self.memory += quantity::parse_value(value).unwrap_or(0);
                }
                RESOURCE_EPHEMERAL_STORAGE => {
                    self.ephemeral_storage += quantity::parse_value(value).unwrap_or(0);
                }
                _ => {
                    let parsed = quantity::parse_value(value).unwrap_or(0);
                    *self.scalar.entry(name.clone()).or_insert(0) += parsed;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.milli_cpu == 0
            && self.memory == 0
            && self.ephemeral_storage == 0
            && self.scalar.values().all(|v| *v == 0)
    }

    /// Render back to a resource list, dropping zero-valued entries.
    pub fn to_resource_list(&self) -> ResourceList {
        let mut list = ResourceList::new();
        if self.milli_cpu > 0 {
            list.insert(RESOURCE_CPU.to_string(), quantity::format_milli(self.milli_cpu));
        }
        if self.memory > 0 {
            list.insert(RESOURCE_MEMORY.to_string(), quantity::format_value(self.memory));
        }
        if self.ephemeral_storage > 0 {
            list.insert(
                RESOURCE_EPHEMERAL_STORAGE.to_string(),
                quantity::format_value(self.ephemeral_storage),
            );
        }
        for (name, value) in &self.scalar {
            if *value > 0 {
                list.insert(name.clone(), quantity::format_value(*value));
            }
        }
        list
    }
}
