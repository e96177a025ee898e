//! Leader election on a `coordination.k8s.io/v1` Lease.
//!
//! Every write carries the resourceVersion that was read, so two replicas
//! racing for an expired lease cannot both win: the loser gets a 409 and
//! keeps waiting.

use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::chrono::{DateTime, Utc};
use kube::Client;
use kube::api::{Api, PostParams};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What a replica may do with the lease it just read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No lease yet; create it.
    Create,
    /// We hold it; bump the renew time.
    Renew,
    /// Someone else held it but let it expire.
    TakeOver { transitions: i32 },
    /// Held by another live replica.
    Wait,
}

/// Decide what `identity` may do with `lease` at `now`.
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = lease else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();
    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renewed, duration) {
        (Some(renewed), Some(duration)) => {
            now > renewed.0 + k8s_openapi::chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    };

    if expired {
        LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseDecision::Wait
    }
}

/// Holds or waits for the operator's lease.
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: &str,
        lease_name: &str,
        identity: &str,
        lease_duration: Duration,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            lease_duration,
        }
    }

    /// Try to acquire or renew the lease; `Ok(true)` when we hold it afterwards.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let existing = match self.api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();

        let result = match (decide(existing.as_ref(), &self.identity, now), existing) {
            (LeaseDecision::Wait, _) => return Ok(false),
            (LeaseDecision::Create, _) => {
                let lease = self.lease(None, now, 0);
                self.api.create(&PostParams::default(), &lease).await
            }
            (LeaseDecision::Renew, Some(mut lease)) => {
                let version = self.resource_version(&lease)?;
                lease.metadata.resource_version = Some(version);
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            (LeaseDecision::TakeOver { transitions }, Some(lease)) => {
                let version = self.resource_version(&lease)?;
                let lease = self.lease(Some(version), now, transitions + 1);
                self.api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            (_, None) => return Ok(false),
        };

        match result {
            Ok(_) => {
                debug!(identity = %self.identity, lease = %self.lease_name, "Lease held");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(identity = %self.identity, "Lease changed underneath us");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block until the lease is ours, polling every `retry`.
    pub async fn acquire(&self, retry: Duration) {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting to acquire leadership..."
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leadership");
                    return;
                }
                Ok(false) => debug!("Another instance is leader, waiting..."),
                Err(e) => warn!(error = %e, "Failed to acquire lease, retrying..."),
            }
            tokio::time::sleep(retry).await;
        }
    }

    fn resource_version(&self, lease: &Lease) -> Result<String, LeaderElectionError> {
        lease
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))
    }

    fn lease(
        &self,
        resource_version: Option<String>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: i32::try_from(self.lease_duration.as_secs()).ok(),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }
}
