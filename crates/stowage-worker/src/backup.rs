//! Backup worker pipeline
//!
//! export + snapshots -> archive -> blob store, then a terminal status.

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use stowage_common::crd::{BackupStatus, RequestPhase};
use stowage_common::location::{resolve_storage_location, StorageLocationStore};
use stowage_common::Error;

use crate::archive::{write_archive, Archive, ArchiveMetadata, ARCHIVE_FORMAT_VERSION};
use crate::document::encode_documents;
use crate::export::{export_resources, resolve_namespaces, ExportPlan};
use crate::requests::BackupRequest;
use crate::snapshot::create_snapshots;
use crate::storage::{artifact_dir, BlobStoreProvider};
use crate::store::ResourceStore;

/// Message on a successful backup
pub const BACKUP_COMPLETED_MESSAGE: &str = "backup completed";

/// Timestamp layout used in storage keys and snapshot names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Collaborators of a backup run
pub struct BackupEnv<'a> {
    /// Cluster being backed up
    pub resources: &'a dyn ResourceStore,
    /// BackupStorageLocation lookup
    pub locations: &'a dyn StorageLocationStore,
    /// Opens the resolved location
    pub blobs: &'a dyn BlobStoreProvider,
    /// Identity of this cluster
    pub cluster_id: &'a str,
}

/// Run a backup and return the location of the stored archive
#[instrument(skip_all, fields(backup = %request.target))]
pub async fn execute_backup(
    env: &BackupEnv<'_>,
    request: &BackupRequest,
    now: DateTime<Utc>,
) -> Result<String, Error> {
    let storage_ref = request.spec.storage_ref.as_ref().map(|r| r.name.as_str());
    let location = resolve_storage_location(env.locations, storage_ref).await?;
    let store = env.blobs.open(&location).await?;

    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let format = request.spec.export_format();
    let namespaces = resolve_namespaces(env.resources, &request.scope).await?;
    info!(namespaces = namespaces.len(), timestamp = %timestamp, "starting backup");

    let resources = if request.spec.export_enabled() {
        let plan = ExportPlan {
            scope: request.scope.clone(),
            resources: request.spec.resources.clone().unwrap_or_default(),
            format,
        };
        export_resources(env.resources, &plan, &namespaces).await?
    } else {
        Vec::new()
    };

    let snapshots = create_snapshots(
        env.resources,
        &request.target.name,
        request.spec.snapshot.as_ref(),
        &namespaces,
        &timestamp,
    )
    .await?;

    let archive = Archive {
        metadata: ArchiveMetadata {
            format_version: ARCHIVE_FORMAT_VERSION,
            kind: request.target.kind.to_string(),
            name: request.target.name.clone(),
            namespace: request.target.namespace.clone().unwrap_or_default(),
            cluster_id: env.cluster_id.to_string(),
            timestamp: timestamp.clone(),
            storage_type: store.storage_type(),
            export_format: format,
        },
        resources,
        snapshots: encode_documents(&snapshots, format)?,
    };
    let bytes = write_archive(&archive)?;

    let dir = artifact_dir(
        env.cluster_id,
        request.target.kind.as_str(),
        request.target.namespace.as_deref(),
        &request.target.name,
        &timestamp,
    );
    store.put(&dir, bytes).await
}

/// Terminal status for a backup outcome
///
/// The artifact location is set exactly when the backup completed.
pub fn backup_status(
    current: &BackupStatus,
    outcome: &Result<String, Error>,
    now: DateTime<Utc>,
) -> BackupStatus {
    let mut status = current.clone();
    status.completed_at = Some(now);
    match outcome {
        Ok(location) => {
            status.phase = RequestPhase::Completed;
            status.artifact_location = Some(location.clone());
            status.message = Some(BACKUP_COMPLETED_MESSAGE.to_string());
        }
        Err(e) => {
            status.phase = RequestPhase::Failed;
            status.artifact_location = None;
            status.message = Some(e.to_string());
        }
    }
    status
}

/// Run a backup and map the outcome to its terminal status
pub async fn run_backup(
    env: &BackupEnv<'_>,
    request: &BackupRequest,
    now: DateTime<Utc>,
) -> BackupStatus {
    let outcome = execute_backup(env, request, now).await;
    match &outcome {
        Ok(location) => info!(backup = %request.target, location = %location, "backup completed"),
        Err(e) => error!(backup = %request.target, error = %e, "backup failed"),
    }
    backup_status(&request.status, &outcome, Utc::now())
}
