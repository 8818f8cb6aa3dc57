//! The scheduling policy document.
//!
//! Loaded once at startup (both by the annotator and the dynamic
//! plugin) and read-only afterwards. The file is a Kubernetes-style
//! manifest under `scheduler.policy.crane.io/v1alpha1`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::annotation::EXTRA_ACTIVE_PERIOD;

pub const POLICY_API_VERSION: &str = "scheduler.policy.crane.io/v1alpha1";
pub const POLICY_KIND: &str = "DynamicSchedulerPolicy";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported policy document {api_version}/{kind}")]
    UnsupportedDocument { api_version: String, kind: String },
}

/// Which metrics exist, how they gate and rank nodes, and how the
/// hot value is derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSchedulerPolicy {
    pub api_version: String,
    pub kind: String,
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Metric names and their refresh periods. A metric missing here is
    /// never annotated and never consulted.
    #[serde(rename = "syncPolicy", default)]
    pub sync_period: Vec<SyncPolicy>,
    /// Filter-stage thresholds; a zero limit disables the check.
    #[serde(default)]
    pub predicate: Vec<PredicatePolicy>,
    /// Weighted score contributions.
    #[serde(default)]
    pub priority: Vec<PriorityPolicy>,
    /// Hot-value formula: Σ ⌊bindings(timeRange) / count⌋.
    #[serde(rename = "hotValue", default)]
    pub hot_value: Vec<HotValuePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicy {
    pub name: String,
    #[serde(with = "crate::duration")]
    pub period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicatePolicy {
    pub name: String,
    #[serde(rename = "maxLimitPercent", alias = "maxLimitPecent", default)]
    pub max_limit_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityPolicy {
    pub name: String,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotValuePolicy {
    #[serde(rename = "timeRange", with = "crate::duration")]
    pub time_range: Duration,
    pub count: u32,
}

impl DynamicSchedulerPolicy {
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, PolicyError> {
        let policy: DynamicSchedulerPolicy = serde_yaml::from_str(data)?;
        if policy.api_version != POLICY_API_VERSION || policy.kind != POLICY_KIND {
            return Err(PolicyError::UnsupportedDocument {
                api_version: policy.api_version,
                kind: policy.kind,
            });
        }
        Ok(policy)
    }

    /// Refresh period of a metric, if the policy defines it.
    pub fn sync_period(&self, metric: &str) -> Option<Duration> {
        self.spec
            .sync_period
            .iter()
            .find(|p| p.name == metric)
            .map(|p| p.period)
    }

    /// How long an annotation for `metric` stays usable: its sync
    /// period plus the grace window. `None` when the metric is unknown
    /// or its period is zero.
    pub fn active_duration(&self, metric: &str) -> Option<Duration> {
        match self.sync_period(metric) {
            Some(period) if !period.is_zero() => Some(period + EXTRA_ACTIVE_PERIOD),
            _ => None,
        }
    }

    /// The widest hot-value window; bindings older than this are dead
    /// weight and can be garbage collected.
    pub fn max_hot_value_range(&self) -> Duration {
        self.spec
            .hot_value
            .iter()
            .map(|hv| hv.time_range)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: scheduler.policy.crane.io/v1alpha1
kind: DynamicSchedulerPolicy
spec:
  syncPolicy:
    - name: cpu_usage_avg_5m
      period: 3m
    - name: mem_usage_avg_5m
      period: 30s
  predicate:
    - name: cpu_usage_avg_5m
      maxLimitPercent: 0.65
  priority:
    - name: cpu_usage_avg_5m
      weight: 1
    - name: mem_usage_avg_5m
      weight: 2
  hotValue:
    - timeRange: 5m
      count: 5
    - timeRange: 1m
      count: 2
"#;

    #[test]
    fn parses_sample_policy() {
        let policy = DynamicSchedulerPolicy::from_yaml(SAMPLE).unwrap();
        assert_eq!(policy.spec.sync_period.len(), 2);
        assert_eq!(policy.spec.predicate[0].max_limit_percent, 0.65);
        assert_eq!(policy.spec.priority[1].weight, 2.0);
        assert_eq!(policy.spec.hot_value[0].count, 5);
    }

    #[test]
    fn accepts_upstream_limit_spelling() {
        let doc = SAMPLE.replace("maxLimitPercent", "maxLimitPecent");
        let policy = DynamicSchedulerPolicy::from_yaml(&doc).unwrap();
        assert_eq!(policy.spec.predicate[0].max_limit_percent, 0.65);
    }

    #[test]
    fn rejects_wrong_api_version() {
        let doc = SAMPLE.replace("v1alpha1", "v2");
        assert!(matches!(
            DynamicSchedulerPolicy::from_yaml(&doc),
            Err(PolicyError::UnsupportedDocument { .. })
        ));
    }

    #[test]
    fn sync_period_lookup() {
        let policy = DynamicSchedulerPolicy::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            policy.sync_period("cpu_usage_avg_5m"),
            Some(Duration::from_secs(180))
        );
        assert_eq!(policy.sync_period("unknown_metric"), None);
    }

    #[test]
    fn active_duration_adds_grace() {
        let policy = DynamicSchedulerPolicy::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            policy.active_duration("mem_usage_avg_5m"),
            Some(Duration::from_secs(30 + 300))
        );
        assert_eq!(policy.active_duration("unknown_metric"), None);
    }

    #[test]
    fn max_hot_value_range_takes_widest() {
        let policy = DynamicSchedulerPolicy::from_yaml(SAMPLE).unwrap();
        assert_eq!(policy.max_hot_value_range(), Duration::from_secs(300));

        let empty = DynamicSchedulerPolicy {
            api_version: POLICY_API_VERSION.to_string(),
            kind: POLICY_KIND.to_string(),
            spec: PolicySpec::default(),
        };
        assert_eq!(empty.max_hot_value_range(), Duration::ZERO);
    }
}
