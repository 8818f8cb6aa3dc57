//! The annotation controller: owns the shared state and runs the loops.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use k8s_openapi::api::core::v1::Event;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ballast_core::annotation;
use ballast_core::policy::DynamicSchedulerPolicy;
use ballast_metrics::MetricsClient;

use crate::cluster::NodeStore;
use crate::event::EventWorker;
use crate::node::{sync_key, NodeWorker, DEFAULT_BACKOFF, MAX_BACKOFF};
use crate::queue::RateLimitingQueue;
use crate::records::BindingRecords;

/// Interval of the binding-records GC pass.
const GC_PERIOD: Duration = Duration::from_secs(60);

/// Shared state of the annotation control loop. Workers hold a
/// non-owning `Arc` back-reference; everything is created and torn down
/// together.
pub struct Controller {
    pub(crate) policy: DynamicSchedulerPolicy,
    pub(crate) nodes: Arc<dyn NodeStore>,
    pub(crate) metrics: Arc<dyn MetricsClient>,
    pub(crate) records: Arc<BindingRecords>,
    pub(crate) timezone: Tz,
}

impl Controller {
    pub fn new(
        policy: DynamicSchedulerPolicy,
        nodes: Arc<dyn NodeStore>,
        metrics: Arc<dyn MetricsClient>,
        binding_heap_size: usize,
    ) -> Self {
        let records = Arc::new(BindingRecords::new(
            binding_heap_size,
            policy.max_hot_value_range(),
        ));
        Self {
            policy,
            nodes,
            metrics,
            records,
            timezone: annotation::local_timezone(),
        }
    }

    pub fn records(&self) -> Arc<BindingRecords> {
        Arc::clone(&self.records)
    }

    /// Run until the shutdown signal flips. Spawns the node worker pool,
    /// the event worker, one sync ticker per policy metric, and the
    /// binding GC.
    pub async fn run(
        self: Arc<Self>,
        concurrent_syncs: usize,
        events: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        info!(
            workers = concurrent_syncs,
            metrics = self.policy.spec.sync_period.len(),
            "annotation controller starting"
        );

        for _ in 0..concurrent_syncs.max(1) {
            let worker = NodeWorker::new(Arc::clone(&self), Arc::clone(&queue));
            tasks.push(tokio::spawn(async move { worker.run().await }));
        }

        {
            let records = self.records();
            let event_worker = EventWorker::new(records);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                event_worker.run(events, shutdown).await;
            }));
        }

        for policy in &self.policy.spec.sync_period {
            if policy.period.is_zero() {
                warn!(metric = %policy.name, "sync period is zero, metric disabled");
                continue;
            }
            let controller = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            let metric = policy.name.clone();
            let period = policy.period;
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => controller.enqueue_all_nodes(&queue, &metric).await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let records = self.records();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(GC_PERIOD);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => records.gc(),
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        let _ = shutdown.changed().await;
        queue.shut_down();
        for task in tasks {
            let _ = task.await;
        }
        info!("annotation controller stopped");
    }

    /// Enqueue every known node under `metric`.
    async fn enqueue_all_nodes(&self, queue: &RateLimitingQueue, metric: &str) {
        match self.nodes.list_node_names().await {
            Ok(names) => {
                for name in names {
                    queue.add(&sync_key(&name, metric));
                }
            }
            Err(err) => warn!(metric, error = %err, "failed to list nodes for sync tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use ballast_core::annotation::HOT_VALUE_KEY;
    use ballast_metrics::{MetricsError, MetricsResult};

    use crate::cluster::{ClusterError, PatchOp};
    use crate::node::NodeWorker;
    use crate::records::Binding;

    /// In-memory node store recording every patch.
    struct FakeNodes {
        nodes: Mutex<HashMap<String, Node>>,
        patches: Mutex<Vec<(String, PatchOp, String, String)>>,
    }

    impl FakeNodes {
        fn with_node(name: &str, ip: Option<&str>) -> Arc<Self> {
            let mut node = Node::default();
            node.metadata.name = Some(name.to_string());
            if let Some(ip) = ip {
                node.status = Some(NodeStatus {
                    addresses: Some(vec![NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: ip.to_string(),
                    }]),
                    ..Default::default()
                });
            }
            let mut nodes = HashMap::new();
            nodes.insert(name.to_string(), node);
            Arc::new(Self {
                nodes: Mutex::new(nodes),
                patches: Mutex::new(Vec::new()),
            })
        }

        fn patches(&self) -> Vec<(String, PatchOp, String, String)> {
            self.patches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeStore for FakeNodes {
        async fn list_node_names(&self) -> Result<Vec<String>, ClusterError> {
            Ok(self.nodes.lock().unwrap().keys().cloned().collect())
        }

        async fn get_node(&self, name: &str) -> Result<Option<Node>, ClusterError> {
            Ok(self.nodes.lock().unwrap().get(name).cloned())
        }

        async fn patch_node_annotation(
            &self,
            name: &str,
            op: PatchOp,
            key: &str,
            value: &str,
        ) -> Result<(), ClusterError> {
            self.patches.lock().unwrap().push((
                name.to_string(),
                op,
                key.to_string(),
                value.to_string(),
            ));
            Ok(())
        }
    }

    /// Metric values keyed by identifier.
    struct FakeMetrics {
        by_identifier: BTreeMap<String, String>,
    }

    #[async_trait]
    impl MetricsClient for FakeMetrics {
        async fn query(&self, metric: &str, identifier: &str) -> MetricsResult<String> {
            self.by_identifier
                .get(identifier)
                .cloned()
                .ok_or_else(|| MetricsError::Empty {
                    metric: metric.to_string(),
                    identifier: identifier.to_string(),
                })
        }
    }

    const POLICY: &str = r#"
apiVersion: scheduler.policy.crane.io/v1alpha1
kind: DynamicSchedulerPolicy
spec:
  syncPolicy:
    - name: cpu_usage_avg_5m
      period: 30s
  predicate:
    - name: cpu_usage_avg_5m
      maxLimitPercent: 0.8
  priority:
    - name: cpu_usage_avg_5m
      weight: 1
  hotValue:
    - timeRange: 1m
      count: 2
    - timeRange: 5m
      count: 5
"#;

    fn controller(
        nodes: Arc<FakeNodes>,
        metrics: BTreeMap<String, String>,
    ) -> Arc<Controller> {
        let policy = DynamicSchedulerPolicy::from_yaml(POLICY).unwrap();
        Arc::new(Controller::new(
            policy,
            nodes,
            Arc::new(FakeMetrics {
                by_identifier: metrics,
            }),
            1024,
        ))
    }

    fn bind(records: &BindingRecords, node: &str, pod: &str, timestamp: i64) {
        records.add_binding(Binding {
            timestamp,
            node: node.to_string(),
            namespace: "default".to_string(),
            pod_name: pod.to_string(),
        });
    }

    #[tokio::test]
    async fn sync_patches_load_and_hot_value() {
        let nodes = FakeNodes::with_node("worker-1", Some("10.0.0.7"));
        let mut metrics = BTreeMap::new();
        metrics.insert("10.0.0.7".to_string(), "0.42000".to_string());

        let ctrl = controller(Arc::clone(&nodes), metrics);
        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let worker = NodeWorker::new(Arc::clone(&ctrl), Arc::clone(&queue));
        queue.add("worker-1/cpu_usage_avg_5m");
        drain(&worker, &queue).await;

        let patches = nodes.patches();
        assert_eq!(patches.len(), 2);

        let (name, op, key, value) = &patches[0];
        assert_eq!(name, "worker-1");
        assert_eq!(*op, PatchOp::Add);
        assert_eq!(key, "cpu_usage_avg_5m");
        assert!(value.starts_with("0.42000,"), "stamped value: {value}");

        let (_, _, key, value) = &patches[1];
        assert_eq!(key, HOT_VALUE_KEY);
        assert!(value.starts_with("0,"), "hot value: {value}");
    }

    /// Process everything currently queued, ignoring retries.
    async fn drain(worker: &NodeWorker, queue: &RateLimitingQueue) {
        while !queue.is_empty() {
            let key = queue.get().await.unwrap();
            let _ = worker.sync_node(&key).await;
            queue.done(&key);
        }
    }

    #[tokio::test]
    async fn falls_back_to_node_name_query() {
        let nodes = FakeNodes::with_node("worker-1", Some("10.0.0.7"));
        let mut metrics = BTreeMap::new();
        // Only the node-name identity resolves.
        metrics.insert("worker-1".to_string(), "0.10000".to_string());

        let ctrl = controller(Arc::clone(&nodes), metrics);
        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let worker = NodeWorker::new(ctrl, queue.clone());
        queue.add("worker-1/cpu_usage_avg_5m");
        drain(&worker, &queue).await;

        let patches = nodes.patches();
        assert!(patches[0].3.starts_with("0.10000,"));
    }

    #[tokio::test]
    async fn missing_node_is_terminal() {
        let nodes = FakeNodes::with_node("worker-1", None);
        let ctrl = controller(nodes, BTreeMap::new());
        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let worker = NodeWorker::new(ctrl, queue);

        let err = worker.sync_node("gone/cpu_usage_avg_5m").await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn metric_failure_is_retryable() {
        let nodes = FakeNodes::with_node("worker-1", Some("10.0.0.7"));
        let ctrl = controller(nodes, BTreeMap::new());
        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let worker = NodeWorker::new(ctrl, queue);

        let err = worker
            .sync_node("worker-1/cpu_usage_avg_5m")
            .await
            .unwrap_err();
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn hot_value_follows_the_floor_formula() {
        let nodes = FakeNodes::with_node("worker-1", Some("10.0.0.7"));
        let mut metrics = BTreeMap::new();
        metrics.insert("10.0.0.7".to_string(), "0.00000".to_string());

        let ctrl = controller(Arc::clone(&nodes), metrics);
        let now = chrono::Utc::now().timestamp();
        // 4 bindings in the last minute, 12 in the last 5 minutes:
        // ⌊4/2⌋ + ⌊12/5⌋ = 2 + 2 = 4.
        for i in 0..4 {
            bind(&ctrl.records, "worker-1", &format!("fresh-{i}"), now - 10);
        }
        for i in 0..8 {
            bind(&ctrl.records, "worker-1", &format!("older-{i}"), now - 120);
        }

        let queue = Arc::new(RateLimitingQueue::new(DEFAULT_BACKOFF, MAX_BACKOFF));
        let worker = NodeWorker::new(ctrl, queue.clone());
        queue.add("worker-1/cpu_usage_avg_5m");
        drain(&worker, &queue).await;

        let patches = nodes.patches();
        let hot = patches
            .iter()
            .find(|(_, _, key, _)| key == HOT_VALUE_KEY)
            .unwrap();
        assert!(hot.3.starts_with("4,"), "hot value annotation: {}", hot.3);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let nodes = FakeNodes::with_node("worker-1", Some("10.0.0.7"));
        let mut metrics = BTreeMap::new();
        metrics.insert("10.0.0.7".to_string(), "0.50000".to_string());
        let ctrl = controller(Arc::clone(&nodes), metrics);

        let (_event_tx, event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&ctrl).run(1, event_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // The startup tick enqueued the node at least once.
        assert!(!nodes.patches().is_empty());
    }
}
