//! Worker process entry points
//!
//! A worker Job runs the operator binary with `--mode=backup-worker` or
//! `--mode=restore-worker` and the owning request's kind, name and
//! namespace. The worker loads the request, runs its pipeline and writes the
//! terminal status itself.

use std::str::FromStr;

use chrono::Utc;
use kube::Client;
use tracing::{info, warn};

use stowage_common::config::WORKER_DEADLINE;
use stowage_common::crd::RequestKind;
use stowage_common::location::KubeStorageLocationStore;
use stowage_common::{Error, OperatorConfig};

use crate::backup::{run_backup, BackupEnv};
use crate::requests::{KubeRequestStore, RequestRef, RequestStore};
use crate::restore::{run_restore, RemoteTargetConnector, RestoreEnv};
use crate::storage::KubeBlobStoreProvider;
use crate::store::KubeResourceStore;

/// Which pipeline a worker runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerMode {
    /// Backup and ClusterBackup
    Backup,
    /// Restore and ClusterRestore
    Restore,
}

impl WorkerMode {
    /// Value of the `--mode` flag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup-worker",
            Self::Restore => "restore-worker",
        }
    }

    /// Mode that handles a request kind
    pub fn for_kind(kind: RequestKind) -> Self {
        if kind.is_backup() {
            Self::Backup
        } else {
            Self::Restore
        }
    }
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup-worker" => Ok(Self::Backup),
            "restore-worker" => Ok(Self::Restore),
            other => Err(Error::unsupported("worker mode", other)),
        }
    }
}

/// Command-line identity of a worker run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Pipeline to run
    pub mode: WorkerMode,
    /// Kind of the owning request
    pub kind: RequestKind,
    /// Name of the owning request
    pub name: String,
    /// Namespace of the owning request (namespaced kinds)
    pub namespace: Option<String>,
}

impl WorkerArgs {
    /// Validate the arguments and return the request they name
    pub fn target(&self) -> Result<RequestRef, Error> {
        if WorkerMode::for_kind(self.kind) != self.mode {
            return Err(Error::validation(format!(
                "{} cannot run a {}",
                self.mode, self.kind
            )));
        }
        if self.name.is_empty() {
            return Err(Error::validation("worker name is required"));
        }
        let target = RequestRef::new(self.kind, &self.name, self.namespace.clone());
        if self.kind.is_namespaced() && target.namespace.is_none() {
            return Err(Error::validation(format!(
                "worker namespace is required for {}",
                self.kind
            )));
        }
        Ok(target)
    }
}

/// Load a backup, run it and write its terminal status
pub async fn backup_worker(
    requests: &dyn RequestStore,
    env: &BackupEnv<'_>,
    target: &RequestRef,
) -> Result<(), Error> {
    let Some(request) = requests.get_backup(target).await? else {
        info!(backup = %target, "backup no longer exists, nothing to do");
        return Ok(());
    };
    if request.status.phase.is_terminal() {
        warn!(backup = %target, phase = %request.status.phase, "backup already finished");
        return Ok(());
    }

    let status = run_backup(env, &request, Utc::now()).await;
    requests.patch_backup_status(target, &status).await
}

/// Load a restore, run it and write its terminal status
pub async fn restore_worker(
    requests: &dyn RequestStore,
    env: &RestoreEnv<'_>,
    target: &RequestRef,
) -> Result<(), Error> {
    let Some(request) = requests.get_restore(target).await? else {
        info!(restore = %target, "restore no longer exists, nothing to do");
        return Ok(());
    };
    if request.status.phase.is_terminal() {
        warn!(restore = %target, phase = %request.status.phase, "restore already finished");
        return Ok(());
    }

    let status = run_restore(env, &request).await;
    requests.patch_restore_status(target, &status).await
}

/// Run a worker against the local cluster under the worker deadline
pub async fn run_worker(
    client: Client,
    config: &OperatorConfig,
    args: &WorkerArgs,
) -> Result<(), Error> {
    let target = args.target()?;
    info!(mode = %args.mode, request = %target, "worker starting");

    let requests = KubeRequestStore::new(client.clone());
    let resources = KubeResourceStore::new(client.clone());
    let locations = KubeStorageLocationStore::new(client.clone());
    let blobs = KubeBlobStoreProvider::new(client.clone(), config);

    let work = async {
        match args.mode {
            WorkerMode::Backup => {
                let env = BackupEnv {
                    resources: &resources,
                    locations: &locations,
                    blobs: &blobs,
                    cluster_id: &config.cluster_id,
                };
                backup_worker(&requests, &env, &target).await
            }
            WorkerMode::Restore => {
                let targets = RemoteTargetConnector::new(client.clone(), config.namespace.clone());
                let env = RestoreEnv {
                    requests: &requests,
                    locations: &locations,
                    blobs: &blobs,
                    local: &resources,
                    targets: &targets,
                };
                restore_worker(&requests, &env, &target).await
            }
        }
    };

    tokio::time::timeout(WORKER_DEADLINE, work)
        .await
        .map_err(|_| {
            Error::internal_with_context(
                "worker",
                format!("deadline of {}s exceeded", WORKER_DEADLINE.as_secs()),
            )
        })?
}
