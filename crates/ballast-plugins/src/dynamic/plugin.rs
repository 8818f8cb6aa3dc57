//! Filter/Score hooks of the load-aware plugin.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use ballast_core::annotation;
use ballast_core::pod::is_daemonset_pod;
use ballast_core::policy::{DynamicSchedulerPolicy, PolicyError};

use crate::framework::{
    normalize_score, CycleState, FilterPlugin, NodeInfo, Plugin, ScorePlugin, Status,
    MAX_NODE_SCORE, MIN_NODE_SCORE,
};

use super::stats;

pub const NAME: &str = "Dynamic";

/// Real-load-aware plugin: rejects overloaded nodes and favours nodes
/// with spare measured capacity, discounted by scheduling pressure.
pub struct DynamicScheduler {
    policy: DynamicSchedulerPolicy,
    timezone: Tz,
}

impl DynamicScheduler {
    pub fn new(policy: DynamicSchedulerPolicy) -> Self {
        Self {
            policy,
            timezone: annotation::local_timezone(),
        }
    }

    pub fn from_policy_file(path: &Path) -> Result<Self, PolicyError> {
        Ok(Self::new(DynamicSchedulerPolicy::from_file(path)?))
    }

    fn node_annotations(node_info: &NodeInfo) -> BTreeMap<String, String> {
        node_info
            .node
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
    }
}

impl Plugin for DynamicScheduler {
    fn name(&self) -> &'static str {
        NAME
    }
}

#[async_trait]
impl FilterPlugin for DynamicScheduler {
    /// Reject the node when any fresh predicate signal exceeds its
    /// threshold. DaemonSet pods always pass.
    async fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        if is_daemonset_pod(pod) {
            return Status::success();
        }

        let node_name = node_info.name();
        let annotations = Self::node_annotations(node_info);
        let now = Utc::now();

        for predicate in &self.policy.spec.predicate {
            let Some(active) = self.policy.active_duration(&predicate.name) else {
                warn!(metric = %predicate.name, "failed to get active duration");
                continue;
            };

            if stats::is_overloaded(node_name, &annotations, predicate, active, now, self.timezone)
            {
                return Status::unschedulable(format!(
                    "Load[{}] of node[{}] is too high",
                    predicate.name, node_name
                ));
            }
        }

        Status::success()
    }
}

#[async_trait]
impl ScorePlugin for DynamicScheduler {
    /// Weighted spare capacity minus `10 · hot_value`, clamped to the
    /// node score range.
    async fn score(&self, _state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> (i64, Status) {
        let node_name = node_info.name();
        let annotations = Self::node_annotations(node_info);
        let now = Utc::now();

        let score = stats::get_node_score(node_name, &annotations, &self.policy, now, self.timezone);
        let hot_value = stats::get_node_hot_value(&annotations, now, self.timezone);

        let discounted = score - (hot_value * 10.0) as i64;
        let final_score = normalize_score(discounted, MAX_NODE_SCORE, MIN_NODE_SCORE);

        debug!(
            node = node_name,
            final_score, score, hot_value, "scored node by measured load"
        );
        (final_score, Status::success())
    }
}
