//! BackupStorageLocation controller
//!
//! Checks that each location carries the configuration its backend needs and
//! reports the result as Available or Unavailable. Nothing is contacted; a
//! location that is Available may still fail at backup time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use stowage_common::crd::{
    BackupStorageLocation, BackupStorageLocationSpec, BackupStorageLocationStatus, Condition,
    ConditionStatus, StorageLocationPhase, StorageType,
};
use stowage_common::kube_utils::patch_cluster_resource_status;
use stowage_common::{Error, FIELD_MANAGER, REQUEUE_ERROR_SECS};

use crate::context::ControllerContext;

/// Compute the status of a location from its spec
pub fn location_status(
    spec: &BackupStorageLocationSpec,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> BackupStorageLocationStatus {
    let (available, message) = match spec.type_ {
        StorageType::S3 => match &spec.s3 {
            Some(s3) if !s3.bucket.is_empty() => (true, "s3 storage location configured"),
            _ => (false, "s3 storage location requires bucket"),
        },
        StorageType::Nfs => match &spec.nfs {
            Some(nfs) if !nfs.server.is_empty() && !nfs.path.is_empty() => {
                (true, "nfs storage location configured")
            }
            _ => (false, "nfs storage location requires server and path"),
        },
    };

    let (phase, condition) = if available {
        (
            StorageLocationPhase::Available,
            Condition::new("Ready", ConditionStatus::True, "Configured", message),
        )
    } else {
        (
            StorageLocationPhase::Unavailable,
            Condition::new("Ready", ConditionStatus::False, "InvalidConfiguration", message),
        )
    };

    BackupStorageLocationStatus {
        phase,
        conditions: vec![condition],
        last_validated: Some(now),
        observed_generation: generation,
        message: Some(message.to_string()),
    }
}

/// True when the status already reflects the current generation
fn is_up_to_date(location: &BackupStorageLocation) -> bool {
    location.status.as_ref().is_some_and(|status| {
        status.phase != StorageLocationPhase::Pending
            && status.observed_generation.is_some()
            && status.observed_generation == location.metadata.generation
    })
}

/// Reconcile a BackupStorageLocation
#[instrument(skip(location, ctx), fields(location = %location.name_any()))]
pub async fn reconcile(
    location: Arc<BackupStorageLocation>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, Error> {
    if is_up_to_date(&location) {
        debug!("generation unchanged, skipping validation");
        return Ok(Action::await_change());
    }

    let status = location_status(&location.spec, location.metadata.generation, Utc::now());
    match status.phase {
        StorageLocationPhase::Available => info!(message = ?status.message, "storage location available"),
        _ => warn!(message = ?status.message, "storage location unavailable"),
    }

    let client = ctx.kube_client()?;
    patch_cluster_resource_status::<BackupStorageLocation>(
        client,
        &location.name_any(),
        &status,
        FIELD_MANAGER,
    )
    .await?;
    Ok(Action::await_change())
}

/// Requeue a location whose status could not be written
pub fn error_policy(
    location: Arc<BackupStorageLocation>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    error!(?error, location = %location.name_any(), "storage location reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use stowage_common::crd::{NfsLocationSpec, S3LocationSpec};

    fn s3(bucket: &str) -> BackupStorageLocationSpec {
        BackupStorageLocationSpec {
            type_: StorageType::S3,
            s3: Some(S3LocationSpec {
                bucket: bucket.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn nfs(server: &str, path: &str) -> BackupStorageLocationSpec {
        BackupStorageLocationSpec {
            type_: StorageType::Nfs,
            nfs: Some(NfsLocationSpec {
                server: server.to_string(),
                path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_locations_are_available() {
        let now = Utc::now();

        let status = location_status(&s3("backups"), Some(1), now);
        assert_eq!(status.phase, StorageLocationPhase::Available);
        assert_eq!(status.message.as_deref(), Some("s3 storage location configured"));
        assert_eq!(status.last_validated, Some(now));
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.conditions[0].status, ConditionStatus::True);

        let status = location_status(&nfs("fileserver", "/exports"), Some(1), now);
        assert_eq!(status.phase, StorageLocationPhase::Available);
        assert_eq!(status.message.as_deref(), Some("nfs storage location configured"));
    }

    #[test]
    fn test_incomplete_locations_are_unavailable() {
        let now = Utc::now();

        let status = location_status(&s3(""), None, now);
        assert_eq!(status.phase, StorageLocationPhase::Unavailable);
        assert_eq!(status.message.as_deref(), Some("s3 storage location requires bucket"));
        assert_eq!(status.conditions[0].reason, "InvalidConfiguration");

        let missing = BackupStorageLocationSpec {
            type_: StorageType::S3,
            ..Default::default()
        };
        assert_eq!(
            location_status(&missing, None, now).phase,
            StorageLocationPhase::Unavailable
        );

        for spec in [nfs("", "/exports"), nfs("fileserver", "")] {
            let status = location_status(&spec, None, now);
            assert_eq!(status.phase, StorageLocationPhase::Unavailable);
            assert_eq!(
                status.message.as_deref(),
                Some("nfs storage location requires server and path")
            );
        }
    }

    #[test]
    fn test_only_new_generations_are_revalidated() {
        let mut location = BackupStorageLocation {
            metadata: ObjectMeta {
                name: Some("archive".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: s3("backups"),
            status: None,
        };
        assert!(!is_up_to_date(&location));

        location.status = Some(location_status(&location.spec, Some(3), Utc::now()));
        assert!(is_up_to_date(&location));

        location.metadata.generation = Some(4);
        assert!(!is_up_to_date(&location));
    }
}
