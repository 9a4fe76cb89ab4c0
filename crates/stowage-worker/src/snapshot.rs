//! Volume snapshot orchestration
//!
//! Creates one VolumeSnapshot per selected PVC. Snapshot names are derived
//! from the backup name, the PVC name and the backup timestamp, so a retried
//! worker finds the snapshots of its first attempt instead of duplicating them.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stowage_common::crd::SnapshotSpec;
use stowage_common::{Error, BACKUP_NAME_LABEL};

use crate::document::{name_of, sanitize, sanitize_name};
use crate::store::{pvc_type, volume_snapshot_type, ResourceStore};

/// Deterministic VolumeSnapshot name for a PVC
pub fn snapshot_name(backup: &str, pvc: &str, timestamp: &str) -> String {
    sanitize_name(&format!("{}-{}-{}", backup, pvc, timestamp))
}

/// Build the VolumeSnapshot requested for one PVC
pub fn snapshot_document(
    backup: &str,
    namespace: &str,
    pvc: &str,
    timestamp: &str,
    class_name: Option<&str>,
) -> Value {
    let mut spec = json!({
        "source": { "persistentVolumeClaimName": pvc }
    });
    if let Some(class) = class_name.filter(|c| !c.is_empty()) {
        spec["volumeSnapshotClassName"] = json!(class);
    }
    let snapshot = volume_snapshot_type();
    json!({
        "apiVersion": snapshot.resource.api_version,
        "kind": snapshot.resource.kind,
        "metadata": {
            "name": snapshot_name(backup, pvc, timestamp),
            "namespace": namespace,
            "labels": { BACKUP_NAME_LABEL: backup },
        },
        "spec": spec,
    })
}

/// A selector narrows the PVC list even when `includeAllPVCs` is set
fn pvc_selector(spec: &SnapshotSpec) -> Option<String> {
    spec.pvc_selector.as_ref().and_then(|s| s.to_query())
}

/// Create snapshots for every selected PVC in the given namespaces
///
/// Returns the sanitized VolumeSnapshot documents, empty when snapshots are
/// disabled. PVCs whose snapshot cannot be created are logged and skipped.
pub async fn create_snapshots(
    store: &dyn ResourceStore,
    backup: &str,
    spec: Option<&SnapshotSpec>,
    namespaces: &[String],
    timestamp: &str,
) -> Result<Vec<Value>, Error> {
    let Some(spec) = spec.filter(|s| s.is_enabled()) else {
        return Ok(Vec::new());
    };

    let selector = pvc_selector(spec);
    let pvcs = pvc_type();
    let snapshots = volume_snapshot_type();
    let mut out = Vec::new();

    for namespace in namespaces {
        let claims = match store
            .list(&pvcs, Some(namespace.clone()), selector.clone())
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "unable to list PVCs");
                continue;
            }
        };

        for claim in &claims {
            let pvc = name_of(claim);
            if pvc.is_empty() {
                continue;
            }
            let doc = snapshot_document(
                backup,
                namespace,
                pvc,
                timestamp,
                spec.volume_snapshot_class_name.as_deref(),
            );
            let name = name_of(&doc).to_string();

            let result = match store.create(&snapshots, Some(namespace.clone()), &doc).await {
                Ok(created) => {
                    info!(namespace = %namespace, pvc = %pvc, snapshot = %name, "created volume snapshot");
                    Ok(Some(created))
                }
                Err(e) if e.is_already_exists() => {
                    debug!(snapshot = %name, "volume snapshot already exists");
                    store.get(&snapshots, Some(namespace.clone()), &name).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(Some(mut snapshot)) => {
                    sanitize(&mut snapshot);
                    out.push(snapshot);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(namespace = %namespace, pvc = %pvc, error = %e, "unable to snapshot PVC");
                }
            }
        }
    }

    Ok(out)
}
