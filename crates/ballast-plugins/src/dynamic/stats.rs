//! Reading load signals out of node annotations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use ballast_core::annotation::{
    parse_stamped_usage, AnnotationError, HOT_VALUE_ACTIVE_PERIOD, HOT_VALUE_KEY,
};
use ballast_core::policy::{DynamicSchedulerPolicy, PredicatePolicy, PriorityPolicy};

use crate::framework::MAX_NODE_SCORE;

pub(crate) type Annotations = BTreeMap<String, String>;

/// A node's fresh usage for `metric`, or the reason there is none.
fn get_resource_usage(
    annotations: &Annotations,
    metric: &str,
    active: std::time::Duration,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<f64, AnnotationError> {
    let raw = annotations
        .get(metric)
        .ok_or_else(|| AnnotationError::Malformed(format!("annotation {metric} not found")))?;
    parse_stamped_usage(raw, active, now, tz)
}

/// Whether a predicate rejects the node. Missing or stale signals never
/// reject; a zero threshold disables the predicate.
pub(crate) fn is_overloaded(
    node_name: &str,
    annotations: &Annotations,
    predicate: &PredicatePolicy,
    active: std::time::Duration,
    now: DateTime<Utc>,
    tz: Tz,
) -> bool {
    let usage = match get_resource_usage(annotations, &predicate.name, active, now, tz) {
        Ok(usage) => usage,
        Err(err) => {
            debug!(
                node = node_name,
                metric = %predicate.name,
                error = %err,
                "no usable load signal, skipping predicate"
            );
            return false;
        }
    };

    if predicate.max_limit_percent == 0.0 {
        return false;
    }

    usage > predicate.max_limit_percent
}

/// One priority's score contribution: `(1 - usage) · weight · MaxNodeScore`.
fn get_score(
    annotations: &Annotations,
    priority: &PriorityPolicy,
    policy: &DynamicSchedulerPolicy,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<f64, AnnotationError> {
    let active = policy.active_duration(&priority.name).ok_or_else(|| {
        AnnotationError::Malformed(format!("no active duration for metric {}", priority.name))
    })?;
    let usage = get_resource_usage(annotations, &priority.name, active, now, tz)?;
    Ok((1.0 - usage) * priority.weight * MAX_NODE_SCORE as f64)
}

/// Weighted-average node score over the priority policies.
///
/// A priority whose signal is missing contributes 0 to the numerator
/// while its weight still counts in the denominator, biasing scores
/// down. Kept as observed in production.
pub(crate) fn get_node_score(
    node_name: &str,
    annotations: &Annotations,
    policy: &DynamicSchedulerPolicy,
    now: DateTime<Utc>,
    tz: Tz,
) -> i64 {
    if policy.spec.priority.is_empty() {
        warn!("no priority policy exists, all nodes score 0");
        return 0;
    }

    let mut score = 0.0;
    let mut weight = 0.0;

    for priority in &policy.spec.priority {
        match get_score(annotations, priority, policy, now, tz) {
            Ok(s) => score += s,
            Err(err) => debug!(
                node = node_name,
                metric = %priority.name,
                error = %err,
                "priority contributes no score"
            ),
        }
        weight += priority.weight;
    }

    if weight == 0.0 {
        return 0;
    }
    (score / weight) as i64
}

/// The node's hot value, if its annotation is fresh. Missing or stale
/// hot values read as 0.
pub(crate) fn get_node_hot_value(
    annotations: &Annotations,
    now: DateTime<Utc>,
    tz: Tz,
) -> f64 {
    get_resource_usage(annotations, HOT_VALUE_KEY, HOT_VALUE_ACTIVE_PERIOD, now, tz).unwrap_or(0.0)
}
