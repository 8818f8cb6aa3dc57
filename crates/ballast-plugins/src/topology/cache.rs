//! TTL'd cache of assumed pod-topology results.
//!
//! A pod's zone choice is decided at Reserve but only observable by
//! other scheduling cycles once the PreBind annotation lands. Until
//! then the choice lives here, so concurrent cycles account for it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use ballast_core::topology::ZoneList;

/// How long an assumption survives without being bound.
pub const DEFAULT_ASSUME_TTL: Duration = Duration::from_secs(30 * 60);

/// Sweep interval for expired assumptions.
const CLEANUP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pod {0} is already assumed")]
    AlreadyAssumed(String),
}

struct Assumption {
    zones: ZoneList,
    deadline: Instant,
}

/// `pod key → (zone list, deadline)` under a reader-writer lock.
pub struct PodTopologyCache {
    ttl: Duration,
    assumptions: RwLock<HashMap<String, Assumption>>,
}

impl PodTopologyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            assumptions: RwLock::new(HashMap::new()),
        }
    }

    /// Record a pod's zone choice. Re-assuming an existing key fails.
    pub fn assume_pod(&self, key: &str, zones: ZoneList) -> Result<(), CacheError> {
        let mut assumptions = self.assumptions.write().unwrap();
        if assumptions.contains_key(key) {
            return Err(CacheError::AlreadyAssumed(key.to_string()));
        }
        assumptions.insert(
            key.to_string(),
            Assumption {
                zones,
                deadline: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    /// Erase a pod's assumption. Idempotent.
    pub fn forget_pod(&self, key: &str) {
        self.assumptions.write().unwrap().remove(key);
    }

    pub fn get_pod_topology(&self, key: &str) -> Option<ZoneList> {
        self.assumptions
            .read()
            .unwrap()
            .get(key)
            .map(|a| a.zones.clone())
    }

    pub fn pod_count(&self) -> usize {
        self.assumptions.read().unwrap().len()
    }

    /// Drop assumptions whose deadline has passed.
    pub fn cleanup_expired(&self) {
        self.cleanup_expired_at(Instant::now());
    }

    /// Deterministic-time variant for tests.
    pub fn cleanup_expired_at(&self, now: Instant) {
        let mut assumptions = self.assumptions.write().unwrap();
        assumptions.retain(|key, assumption| {
            let live = now < assumption.deadline;
            if !live {
                debug!(pod = %key, "expiring assumed pod topology");
            }
            live
        });
    }

    /// Background sweep until shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_PERIOD);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.cleanup_expired(),
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
