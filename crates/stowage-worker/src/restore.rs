//! Restore worker pipeline
//!
//! source backup -> blob store -> archive -> apply, then a terminal status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use tracing::{error, info, instrument};

use stowage_common::crd::{
    ExportFormat, RequestKind, RequestPhase, RestoreSourceRef, RestoreStatus, SourceKind,
};
use stowage_common::location::{resolve_storage_location, StorageLocationStore};
use stowage_common::remote::remote_client;
use stowage_common::Error;

use crate::apply::{apply_documents, ApplyOptions, ApplySummary};
use crate::archive::read_archive;
use crate::document::decode_documents;
use crate::requests::{BackupRequest, RequestRef, RequestStore, RestoreRequest};
use crate::storage::BlobStoreProvider;
use crate::store::{KubeResourceStore, ResourceStore};

/// Message on a successful restore
pub const RESTORE_COMPLETED_MESSAGE: &str = "restore completed";

/// Connects to the cluster a restore writes to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Resource store for a RemoteCluster
    async fn connect(&self, remote: &str) -> Result<Arc<dyn ResourceStore>, Error>;
}

/// TargetConnector building clients from RemoteCluster credentials
pub struct RemoteTargetConnector {
    client: Client,
    operator_namespace: String,
}

impl RemoteTargetConnector {
    /// Create a connector reading credential secrets from the local cluster
    pub fn new(client: Client, operator_namespace: impl Into<String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
        }
    }
}

#[async_trait]
impl TargetConnector for RemoteTargetConnector {
    async fn connect(&self, remote: &str) -> Result<Arc<dyn ResourceStore>, Error> {
        let client = remote_client(&self.client, remote, &self.operator_namespace).await?;
        Ok(Arc::new(KubeResourceStore::new(client)))
    }
}

/// Collaborators of a restore run
pub struct RestoreEnv<'a> {
    /// Source backup lookup
    pub requests: &'a dyn RequestStore,
    /// BackupStorageLocation lookup
    pub locations: &'a dyn StorageLocationStore,
    /// Opens the resolved location
    pub blobs: &'a dyn BlobStoreProvider,
    /// The local cluster, target when no RemoteCluster is named
    pub local: &'a dyn ResourceStore,
    /// Peer cluster connections
    pub targets: &'a dyn TargetConnector,
}

/// Identity of the backup a restore reads
///
/// A `Backup` source without a namespace is looked up next to a namespaced
/// restore; a ClusterRestore must name it.
pub fn source_ref(restore: &RestoreRequest) -> Result<RequestRef, Error> {
    let source: &RestoreSourceRef = &restore.spec.source_ref;
    let kind = source.source_kind()?;
    let namespace = match kind {
        SourceKind::ClusterBackup => None,
        SourceKind::Backup => {
            let ns = source
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .or_else(|| restore.target.namespace.clone());
            if ns.is_none() {
                return Err(Error::validation_for_field(
                    &restore.target.name,
                    "spec.sourceRef.namespace",
                    "sourceRef.namespace is required for Backup",
                ));
            }
            ns
        }
    };
    Ok(RequestRef::new(RequestKind::from(kind), &source.name, namespace))
}

/// Apply options for a restore
pub fn apply_options(restore: &RestoreRequest) -> ApplyOptions {
    ApplyOptions {
        namespace_mapping: restore.spec.namespace_mapping.clone(),
        default_namespace: match restore.target.kind {
            RequestKind::Restore => restore.target.namespace.clone(),
            _ => None,
        },
        overwrite: restore.spec.overwrite_policy.unwrap_or_default(),
    }
}

async fn load_source(env: &RestoreEnv<'_>, restore: &RestoreRequest) -> Result<BackupRequest, Error> {
    let source = source_ref(restore)?;
    env.requests
        .get_backup(&source)
        .await?
        .ok_or_else(|| Error::validation_for_field(
            &restore.target.name,
            "spec.sourceRef",
            format!("source {} not found", source),
        ))
}

/// Run a restore and return what was applied
#[instrument(skip_all, fields(restore = %restore.target))]
pub async fn execute_restore(
    env: &RestoreEnv<'_>,
    restore: &RestoreRequest,
) -> Result<ApplySummary, Error> {
    let source = load_source(env, restore).await?;
    let artifact = source
        .status
        .artifact_location
        .clone()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::archive("artifact location missing on source backup"))?;

    let storage_ref = source.spec.storage_ref.as_ref().map(|r| r.name.as_str());
    let location = resolve_storage_location(env.locations, storage_ref).await?;
    let store = env.blobs.open(&location).await?;

    let bytes = store.get(&artifact).await?;
    let archive = read_archive(&bytes)?;
    let format: ExportFormat = archive.metadata.export_format;
    let mut docs = decode_documents(&archive.resources, format)?;
    docs.extend(decode_documents(&archive.snapshots, format)?);
    info!(
        source = %source.target,
        documents = docs.len(),
        artifact = %artifact,
        "decoded archive"
    );

    let options = apply_options(restore);
    match restore.spec.target_cluster_ref.as_ref().filter(|r| !r.name.is_empty()) {
        Some(remote) => {
            let target = env.targets.connect(&remote.name).await?;
            apply_documents(target.as_ref(), docs, &options).await
        }
        None => apply_documents(env.local, docs, &options).await,
    }
}

/// Terminal status for a restore outcome
pub fn restore_status(
    current: &RestoreStatus,
    outcome: &Result<ApplySummary, Error>,
    now: DateTime<Utc>,
) -> RestoreStatus {
    let mut status = current.clone();
    status.completed_at = Some(now);
    match outcome {
        Ok(_) => {
            status.phase = RequestPhase::Completed;
            status.message = Some(RESTORE_COMPLETED_MESSAGE.to_string());
        }
        Err(e) => {
            status.phase = RequestPhase::Failed;
            status.message = Some(e.to_string());
        }
    }
    status
}

/// Run a restore and map the outcome to its terminal status
pub async fn run_restore(env: &RestoreEnv<'_>, restore: &RestoreRequest) -> RestoreStatus {
    let outcome = execute_restore(env, restore).await;
    match &outcome {
        Ok(summary) => info!(
            restore = %restore.target,
            created = summary.created,
            replaced = summary.replaced,
            merged = summary.merged,
            unchanged = summary.unchanged,
            unmapped = summary.unmapped,
            "restore completed"
        ),
        Err(e) => error!(restore = %restore.target, error = %e, "restore failed"),
    }
    restore_status(&restore.status, &outcome, Utc::now())
}
