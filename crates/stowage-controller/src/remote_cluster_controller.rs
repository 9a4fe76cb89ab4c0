//! RemoteCluster controller
//!
//! Periodically builds a client from each RemoteCluster's credential and
//! probes the peer's API server. The outcome is recorded as a Reachable
//! condition plus a message; an unreachable peer is not an error for the
//! controller, it is a status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use stowage_common::crd::{Condition, ConditionStatus, RemoteCluster, RemoteClusterStatus};
use stowage_common::kube_utils::{client_from_config, patch_cluster_resource_status};
use stowage_common::remote::{load_credential, probe, REACHABLE_MESSAGE};
use stowage_common::{Error, FIELD_MANAGER, REQUEUE_ERROR_SECS};

use crate::context::ControllerContext;
use crate::REMOTE_CLUSTER_RESYNC_SECS;

/// Cluster access used by the RemoteCluster controller
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClusterClient: Send + Sync {
    /// Connect to the peer and run a minimal request against it
    ///
    /// Returns a human-readable reason when the peer cannot be used.
    async fn check(&self, remote: &RemoteCluster) -> Result<(), String>;

    /// Merge-patch a RemoteCluster's status
    async fn patch_status(&self, name: &str, status: &RemoteClusterStatus) -> Result<(), Error>;
}

/// RemoteClusterClient backed by the API server
pub struct KubeRemoteClusterClient {
    client: Client,
    secret_namespace: String,
}

impl KubeRemoteClusterClient {
    /// Create a client reading credential secrets from `secret_namespace` by default
    pub fn new(client: Client, secret_namespace: impl Into<String>) -> Self {
        Self {
            client,
            secret_namespace: secret_namespace.into(),
        }
    }
}

#[async_trait]
impl RemoteClusterClient for KubeRemoteClusterClient {
    async fn check(&self, remote: &RemoteCluster) -> Result<(), String> {
        let credential = load_credential(&self.client, remote, &self.secret_namespace)
            .await
            .map_err(|e| e.to_string())?;
        let config = credential.to_config().await.map_err(|e| e.to_string())?;
        let peer = client_from_config(config)
            .map_err(|e| format!("failed to build remote client: {}", e))?;
        probe(&peer).await
    }

    async fn patch_status(&self, name: &str, status: &RemoteClusterStatus) -> Result<(), Error> {
        // Deleted while probing
        let remotes: Api<RemoteCluster> = Api::all(self.client.clone());
        if remotes.get_opt(name).await?.is_none() {
            return Ok(());
        }
        patch_cluster_resource_status::<RemoteCluster>(&self.client, name, status, FIELD_MANAGER)
            .await?;
        Ok(())
    }
}

/// Status recorded after a probe
pub fn probe_status(
    outcome: &Result<(), String>,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> RemoteClusterStatus {
    let (condition, message) = match outcome {
        Ok(()) => (
            Condition::new("Reachable", ConditionStatus::True, "ProbeSucceeded", REACHABLE_MESSAGE),
            REACHABLE_MESSAGE.to_string(),
        ),
        Err(reason) => (
            Condition::new("Reachable", ConditionStatus::False, "ProbeFailed", reason.as_str()),
            reason.clone(),
        ),
    };
    RemoteClusterStatus {
        conditions: vec![condition],
        last_validated: Some(now),
        observed_generation: generation,
        message: Some(message),
    }
}

/// How long until the RemoteCluster is due for another probe
///
/// `None` means it should be probed now: it was never probed, its spec
/// changed, or the last probe is older than the resync interval.
pub fn next_probe_in(remote: &RemoteCluster, now: DateTime<Utc>) -> Option<Duration> {
    let status = remote.status.as_ref()?;
    if status.observed_generation != remote.metadata.generation {
        return None;
    }
    let elapsed = (now - status.last_validated?).to_std().ok()?;
    Duration::from_secs(REMOTE_CLUSTER_RESYNC_SECS).checked_sub(elapsed)
}

/// Reconcile a RemoteCluster
#[instrument(skip(remote, ctx), fields(remote = %remote.name_any()))]
pub async fn reconcile(
    remote: Arc<RemoteCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, Error> {
    let now = Utc::now();
    if let Some(wait) = next_probe_in(&remote, now).filter(|w| !w.is_zero()) {
        debug!(wait_secs = wait.as_secs(), "recently probed");
        return Ok(Action::requeue(wait));
    }

    let outcome = ctx.remotes.check(&remote).await;
    match &outcome {
        Ok(()) => info!(api_server = %remote.spec.api_server, "remote cluster reachable"),
        Err(reason) => warn!(api_server = %remote.spec.api_server, %reason, "remote cluster unusable"),
    }

    let status = probe_status(&outcome, remote.metadata.generation, now);
    ctx.remotes.patch_status(&remote.name_any(), &status).await?;
    Ok(Action::requeue(Duration::from_secs(REMOTE_CLUSTER_RESYNC_SECS)))
}

/// Requeue a RemoteCluster whose status could not be written
pub fn error_policy(remote: Arc<RemoteCluster>, error: &Error, _ctx: Arc<ControllerContext>) -> Action {
    error!(?error, remote = %remote.name_any(), "remote cluster reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}
