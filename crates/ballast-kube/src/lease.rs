//! Lease-based leadership signal.
//!
//! One controller process holds the loops at a time. The election
//! exposes a `watch::Receiver<bool>`; once leadership is lost the
//! signal flips and the daemon exits so a fresh election proceeds.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::{api::PostParams, Api, Client};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease api error: {0}")]
    Api(#[from] kube::Error),
    #[error("leadership lost")]
    Lost,
}

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub namespace: String,
    pub name: String,
    /// Unique holder identity (hostname plus a random suffix).
    pub identity: String,
    pub lease_duration: Duration,
    pub retry_period: Duration,
}

pub struct LeaderElection {
    api: Api<Lease>,
    config: LeaseConfig,
}

impl LeaderElection {
    pub fn new(client: Client, config: LeaseConfig) -> Self {
        let api = Api::namespaced(client, &config.namespace);
        Self { api, config }
    }

    /// Campaign for the lease, then renew it until it is lost.
    ///
    /// `leadership` flips to true on acquisition and back to false on
    /// loss; the function only returns on loss or on an unrecoverable
    /// API error.
    pub async fn run(&self, leadership: watch::Sender<bool>) -> Result<(), LeaseError> {
        loop {
            if self.try_acquire().await? {
                break;
            }
            debug!(lease = %self.config.name, "lease held elsewhere, retrying");
            tokio::time::sleep(self.config.retry_period).await;
        }

        info!(
            lease = %self.config.name,
            identity = %self.config.identity,
            "acquired leadership"
        );
        let _ = leadership.send(true);

        loop {
            tokio::time::sleep(self.config.retry_period).await;
            match self.try_acquire().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(lease = %self.config.name, "lease taken over by another holder");
                    let _ = leadership.send(false);
                    return Err(LeaseError::Lost);
                }
                Err(err) => {
                    // A renew attempt may fail transiently; the lease
                    // duration is the real deadline. One more retry
                    // period of grace, then give up.
                    warn!(error = %err, "lease renew failed");
                    tokio::time::sleep(self.config.retry_period).await;
                    if !self.try_acquire().await.unwrap_or(false) {
                        let _ = leadership.send(false);
                        return Err(LeaseError::Lost);
                    }
                }
            }
        }
    }

    /// Acquire or renew: take a missing lease, refresh our own, steal an
    /// expired one. Conflicts report as not-acquired.
    async fn try_acquire(&self) -> Result<bool, LeaseError> {
        let now = MicroTime(Utc::now());
        let duration_secs = self.config.lease_duration.as_secs() as i32;

        match self.api.get_opt(&self.config.name).await? {
            None => {
                let lease = self.fresh_lease(&now, duration_secs, None);
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            Some(current) => {
                let spec = current.spec.clone().unwrap_or_default();
                let held_by_us =
                    spec.holder_identity.as_deref() == Some(self.config.identity.as_str());
                if !held_by_us && !lease_expired(&spec, &now) {
                    return Ok(false);
                }

                let mut lease = self.fresh_lease(&now, duration_secs, spec.acquire_time);
                if !held_by_us {
                    lease.spec.as_mut().unwrap().acquire_time = Some(now.clone());
                    let transitions = spec.lease_transitions.unwrap_or(0);
                    lease.spec.as_mut().unwrap().lease_transitions = Some(transitions + 1);
                }
                lease.metadata.resource_version = current.metadata.resource_version.clone();

                match self
                    .api
                    .replace(&self.config.name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    fn fresh_lease(
        &self,
        now: &MicroTime,
        duration_secs: i32,
        acquire_time: Option<MicroTime>,
    ) -> Lease {
        let mut lease = Lease::default();
        lease.metadata.name = Some(self.config.name.clone());
        lease.metadata.namespace = Some(self.config.namespace.clone());
        lease.spec = Some(LeaseSpec {
            holder_identity: Some(self.config.identity.clone()),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: acquire_time.or_else(|| Some(now.clone())),
            renew_time: Some(now.clone()),
            ..Default::default()
        });
        lease
    }
}

fn lease_expired(spec: &LeaseSpec, now: &MicroTime) -> bool {
    let Some(renewed) = spec.renew_time.as_ref() else {
        return true;
    };
    let duration = chrono::Duration::seconds(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
    renewed.0 + duration < now.0
}
