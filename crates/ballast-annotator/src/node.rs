//! Node sync worker: resolves `"<node>/<metric>"` keys into annotation
//! patches.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info, warn};

use ballast_core::annotation::{self, HOT_VALUE_KEY};

use crate::cluster::{node_internal_ip, PatchOp};
use crate::controller::Controller;
use crate::error::AnnotatorError;
use crate::queue::RateLimitingQueue;

/// Initial retry delay for a failed sync key.
pub const DEFAULT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(10);

/// Backoff ceiling.
pub const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(360);

pub fn sync_key(node: &str, metric: &str) -> String {
    format!("{node}/{metric}")
}

pub fn split_sync_key(key: &str) -> Result<(&str, &str), AnnotatorError> {
    match key.split_once('/') {
        Some((node, metric))
            if !node.is_empty() && !metric.is_empty() && !metric.contains('/') =>
        {
            Ok((node, metric))
        }
        _ => Err(AnnotatorError::InvalidKey(key.to_string())),
    }
}

/// One member of the node worker pool. Drains the rate-limited queue
/// until shutdown.
pub struct NodeWorker {
    controller: Arc<Controller>,
    queue: Arc<RateLimitingQueue>,
}

impl NodeWorker {
    pub fn new(controller: Arc<Controller>, queue: Arc<RateLimitingQueue>) -> Self {
        Self { controller, queue }
    }

    pub async fn run(&self) {
        info!("node worker started");
        while let Some(key) = self.queue.get().await {
            let started = Instant::now();
            match self.sync_node(&key).await {
                Ok(()) => {
                    self.queue.forget(&key);
                    debug!(key = %key, elapsed = ?started.elapsed(), "finished node sync");
                }
                Err(err) if err.is_terminal() => {
                    warn!(key = %key, error = %err, "dropping node sync key");
                    self.queue.forget(&key);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "node sync failed, will retry");
                    Arc::clone(&self.queue).add_rate_limited(&key);
                }
            }
            self.queue.done(&key);
        }
        info!("node worker stopped");
    }

    pub(crate) async fn sync_node(&self, key: &str) -> Result<(), AnnotatorError> {
        let (node_name, metric) = split_sync_key(key)?;

        let node = self
            .controller
            .nodes
            .get_node(node_name)
            .await?
            .ok_or_else(|| AnnotatorError::NodeGone(node_name.to_string()))?;

        self.annotate_node_load(&node, node_name, metric).await?;
        self.annotate_node_hot_value(&node, node_name).await?;
        Ok(())
    }

    /// Query the metric for the node and patch it on. The internal IP is
    /// the primary identity; the node name is the fallback when the
    /// backend labels instances by hostname.
    async fn annotate_node_load(
        &self,
        node: &Node,
        node_name: &str,
        metric: &str,
    ) -> Result<(), AnnotatorError> {
        if let Some(ip) = node_internal_ip(node) {
            match self.controller.metrics.query(metric, ip).await {
                Ok(value) => {
                    return self.patch_annotation(node, node_name, metric, &value).await;
                }
                Err(err) => {
                    debug!(
                        node = node_name,
                        metric,
                        error = %err,
                        "query by internal IP failed, falling back to node name"
                    );
                }
            }
        }

        match self.controller.metrics.query(metric, node_name).await {
            Ok(value) => self.patch_annotation(node, node_name, metric, &value).await,
            Err(source) => Err(AnnotatorError::Metric {
                node: node_name.to_string(),
                metric: metric.to_string(),
                source,
            }),
        }
    }

    /// Derive the hot value from recent bindings and patch it on.
    async fn annotate_node_hot_value(
        &self,
        node: &Node,
        node_name: &str,
    ) -> Result<(), AnnotatorError> {
        let mut value: u64 = 0;
        for hv in &self.controller.policy.spec.hot_value {
            if hv.count == 0 {
                continue;
            }
            let recent = self
                .controller
                .records
                .node_binding_count_since(node_name, hv.time_range);
            value += recent as u64 / hv.count as u64;
        }

        self.patch_annotation(node, node_name, HOT_VALUE_KEY, &value.to_string())
            .await
    }

    async fn patch_annotation(
        &self,
        node: &Node,
        node_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), AnnotatorError> {
        let exists = node
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(key));
        let op = if exists { PatchOp::Replace } else { PatchOp::Add };

        let stamped = annotation::stamp(value, Utc::now(), self.controller.timezone);
        self.controller
            .nodes
            .patch_node_annotation(node_name, op, key, &stamped)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        let key = sync_key("worker-1", "cpu_usage_avg_5m");
        assert_eq!(key, "worker-1/cpu_usage_avg_5m");
        assert_eq!(split_sync_key(&key).unwrap(), ("worker-1", "cpu_usage_avg_5m"));
    }

    #[test]
    fn rejects_bad_keys() {
        for key in ["", "no-slash", "/metric", "node/", "a/b/c"] {
            assert!(split_sync_key(key).is_err(), "key {key:?} should be invalid");
        }
    }
}
