//! Worker Job construction
//!
//! Every request gets exactly one worker Job in the operator namespace. The
//! Job runs the operator image in worker mode and is tied to its request by
//! owner labels rather than ownerReferences, since cluster-scoped and
//! namespaced owners share one Job namespace.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, NFSVolumeSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use stowage_common::config::{JOB_TTL_AFTER_FINISHED_SECS, WORKER_DEADLINE};
use stowage_common::crd::{BackupStorageLocation, RequestKind, StorageType};
use stowage_common::{
    Error, OperatorConfig, OWNER_KIND_LABEL, OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
    OWNER_UID_LABEL,
};
use stowage_worker::WorkerMode;

/// Entrypoint of the operator image
pub const WORKER_COMMAND: &str = "/manager";

/// Name of the NFS volume in worker pods
pub const NFS_VOLUME_NAME: &str = "nfs-storage";

/// Identity of the request owning a worker Job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOwner {
    /// Request kind
    pub kind: RequestKind,
    /// Request name
    pub name: String,
    /// Request namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Request UID
    pub uid: String,
}

impl JobOwner {
    /// Labels placed on the Job and its pod
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (OWNER_UID_LABEL.to_string(), self.uid.clone()),
            (OWNER_KIND_LABEL.to_string(), self.kind.to_string()),
            (OWNER_NAME_LABEL.to_string(), self.name.clone()),
        ]);
        if let Some(ns) = &self.namespace {
            labels.insert(OWNER_NAMESPACE_LABEL.to_string(), ns.clone());
        }
        labels
    }

    /// Server-side selector narrowing Jobs to this owner's UID
    pub fn uid_selector(&self) -> String {
        format!("{}={}", OWNER_UID_LABEL, self.uid)
    }

    /// Whether `job` belongs to this owner
    pub fn owns(&self, job: &Job) -> bool {
        let Some(labels) = job.metadata.labels.as_ref() else {
            return false;
        };
        let label = |key: &str| labels.get(key).map(String::as_str).unwrap_or_default();

        label(OWNER_UID_LABEL) == self.uid
            && label(OWNER_KIND_LABEL) == self.kind.as_str()
            && label(OWNER_NAME_LABEL) == self.name
            && label(OWNER_NAMESPACE_LABEL) == self.namespace.as_deref().unwrap_or_default()
    }
}

/// Owner kind, name and namespace read back from a Job's labels
pub fn owner_of(job: &Job) -> Option<(RequestKind, String, Option<String>)> {
    let labels = job.metadata.labels.as_ref()?;
    let kind = labels.get(OWNER_KIND_LABEL)?.parse().ok()?;
    let name = labels.get(OWNER_NAME_LABEL)?.clone();
    let namespace = labels.get(OWNER_NAMESPACE_LABEL).cloned();
    Some((kind, name, namespace))
}

/// `generateName` prefix of a worker Job
pub fn job_name_prefix(kind: RequestKind, name: &str) -> String {
    let verb = if kind.is_backup() { "backup" } else { "restore" };
    format!("{}-{}-", verb, name).to_lowercase()
}

/// Job deadline for a request timeout
///
/// Unset or zero timeouts leave the deadline to the worker itself. Longer
/// timeouts are capped at the worker deadline.
pub fn active_deadline_seconds(timeout: Option<Duration>) -> Option<i64> {
    let secs = timeout?.as_secs();
    if secs == 0 {
        return None;
    }
    Some(secs.min(WORKER_DEADLINE.as_secs()) as i64)
}

/// Build the worker Job for a request
///
/// NFS locations are mounted into the pod, so their server and path must be
/// set.
pub fn build_worker_job(
    owner: &JobOwner,
    config: &OperatorConfig,
    location: &BackupStorageLocation,
    timeout: Option<Duration>,
) -> Result<Job, Error> {
    let mode = WorkerMode::for_kind(owner.kind);
    let labels = owner.labels();

    let mut container = Container {
        name: mode.as_str().to_string(),
        image: Some(config.image.clone()),
        command: Some(vec![WORKER_COMMAND.to_string()]),
        args: Some(vec![
            format!("--mode={}", mode),
            format!("--worker-kind={}", owner.kind),
            format!("--worker-name={}", owner.name),
            format!(
                "--worker-namespace={}",
                owner.namespace.as_deref().unwrap_or_default()
            ),
        ]),
        env: Some(vec![
            EnvVar {
                name: "CLUSTER_ID".to_string(),
                value: Some(config.cluster_id.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "POD_NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut volumes = Vec::new();
    if location.spec.type_ == StorageType::Nfs {
        let nfs = location
            .spec
            .nfs
            .as_ref()
            .filter(|nfs| !nfs.server.is_empty() && !nfs.path.is_empty())
            .ok_or_else(|| Error::storage("nfs", "storage location missing server/path"))?;
        let mount_path = config.nfs_mount_path.display().to_string();

        volumes.push(Volume {
            name: NFS_VOLUME_NAME.to_string(),
            nfs: Some(NFSVolumeSource {
                server: nfs.server.clone(),
                path: nfs.path.clone(),
                read_only: Some(nfs.read_only),
            }),
            ..Default::default()
        });
        container.volume_mounts = Some(vec![VolumeMount {
            name: NFS_VOLUME_NAME.to_string(),
            mount_path: mount_path.clone(),
            ..Default::default()
        }]);
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: "NFS_MOUNT_PATH".to_string(),
            value: Some(mount_path),
            ..Default::default()
        });
    }

    Ok(Job {
        metadata: ObjectMeta {
            generate_name: Some(job_name_prefix(owner.kind, &owner.name)),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_AFTER_FINISHED_SECS),
            active_deadline_seconds: active_deadline_seconds(timeout),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Terminal counters of a worker Job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Neither succeeded nor failed yet
    Running,
    /// At least one pod succeeded
    Succeeded,
    /// At least one pod failed
    Failed,
}

/// Read a Job's outcome from its status counters
pub fn job_outcome(job: &Job) -> JobOutcome {
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);

    if succeeded > 0 {
        JobOutcome::Succeeded
    } else if failed > 0 {
        JobOutcome::Failed
    } else {
        JobOutcome::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;
    use std::path::PathBuf;
    use stowage_common::crd::{BackupStorageLocationSpec, NfsLocationSpec, S3LocationSpec};

    fn owner(kind: RequestKind, namespace: Option<&str>) -> JobOwner {
        JobOwner {
            kind,
            name: "Nightly".to_string(),
            namespace: namespace.map(str::to_string),
            uid: "uid-1234".to_string(),
        }
    }

    fn config() -> OperatorConfig {
        OperatorConfig {
            namespace: "stowage-system".to_string(),
            service_account: "stowage-controller".to_string(),
            image: "registry.local/stowage:v1".to_string(),
            cluster_id: "prod-east".to_string(),
            nfs_mount_path: PathBuf::from("/data"),
        }
    }

    fn location(type_: StorageType, nfs: Option<NfsLocationSpec>) -> BackupStorageLocation {
        BackupStorageLocation {
            metadata: ObjectMeta {
                name: Some("primary".to_string()),
                ..Default::default()
            },
            spec: BackupStorageLocationSpec {
                type_,
                s3: (type_ == StorageType::S3).then(|| S3LocationSpec {
                    bucket: "backups".to_string(),
                    ..Default::default()
                }),
                nfs,
                default: true,
            },
            status: None,
        }
    }

    fn nfs_spec() -> NfsLocationSpec {
        NfsLocationSpec {
            server: "nfs.local".to_string(),
            path: "/exports".to_string(),
            read_only: false,
            ..Default::default()
        }
    }

    fn pod(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn test_backup_job_shape() {
        let job = build_worker_job(
            &owner(RequestKind::Backup, Some("apps")),
            &config(),
            &location(StorageType::S3, None),
            None,
        )
        .unwrap();

        assert_eq!(job.metadata.generate_name.as_deref(), Some("backup-nightly-"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("stowage-system"));

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(3600));
        assert_eq!(spec.active_deadline_seconds, None);

        let pod = pod(&job);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("stowage-controller"));
        assert!(pod.volumes.is_none());

        let container = &pod.containers[0];
        assert_eq!(container.name, "backup-worker");
        assert_eq!(container.command, Some(vec!["/manager".to_string()]));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "--mode=backup-worker".to_string(),
                "--worker-kind=Backup".to_string(),
                "--worker-name=Nightly".to_string(),
                "--worker-namespace=apps".to_string(),
            ]
        );
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].value.as_deref(), Some("prod-east"));
        assert_eq!(
            env[1].value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "metadata.namespace"
        );
    }

    #[test]
    fn test_nfs_job_mounts_storage() {
        let job = build_worker_job(
            &owner(RequestKind::ClusterRestore, None),
            &config(),
            &location(StorageType::Nfs, Some(nfs_spec())),
            Some(Duration::from_secs(600)),
        )
        .unwrap();

        assert_eq!(job.metadata.generate_name.as_deref(), Some("restore-nightly-"));
        assert_eq!(job.spec.as_ref().unwrap().active_deadline_seconds, Some(600));

        let pod = pod(&job);
        let volume = &pod.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, NFS_VOLUME_NAME);
        let nfs = volume.nfs.as_ref().unwrap();
        assert_eq!(nfs.server, "nfs.local");
        assert_eq!(nfs.path, "/exports");

        let container = &pod.containers[0];
        assert_eq!(container.name, "restore-worker");
        assert_eq!(container.volume_mounts.as_ref().unwrap()[0].mount_path, "/data");
        assert!(container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .any(|e| e.name == "NFS_MOUNT_PATH" && e.value.as_deref() == Some("/data")));
        assert!(container
            .args
            .as_ref()
            .unwrap()
            .contains(&"--worker-namespace=".to_string()));
    }

    #[test]
    fn test_incomplete_nfs_location_is_rejected() {
        let mut nfs = nfs_spec();
        nfs.path.clear();
        let err = build_worker_job(
            &owner(RequestKind::Backup, Some("apps")),
            &config(),
            &location(StorageType::Nfs, Some(nfs)),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "storage error [nfs]: storage location missing server/path"
        );
    }

    #[test]
    fn test_deadline_is_capped() {
        assert_eq!(active_deadline_seconds(None), None);
        assert_eq!(active_deadline_seconds(Some(Duration::ZERO)), None);
        assert_eq!(active_deadline_seconds(Some(Duration::from_secs(90))), Some(90));
        assert_eq!(
            active_deadline_seconds(Some(Duration::from_secs(24 * 3600))),
            Some(7200)
        );
    }

    #[test]
    fn test_owner_labels_identify_job() {
        let namespaced = owner(RequestKind::Backup, Some("apps"));
        let job = Job {
            metadata: ObjectMeta {
                labels: Some(namespaced.labels()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(namespaced.owns(&job));
        assert_eq!(
            owner_of(&job),
            Some((RequestKind::Backup, "Nightly".to_string(), Some("apps".to_string())))
        );

        let other_namespace = owner(RequestKind::Backup, Some("web"));
        assert!(!other_namespace.owns(&job));

        let cluster = owner(RequestKind::ClusterBackup, None);
        assert!(!cluster.labels().contains_key(OWNER_NAMESPACE_LABEL));
        assert_eq!(cluster.uid_selector(), "stowage.dev/owner-uid=uid-1234");
    }

    #[test]
    fn test_job_outcome_from_counters() {
        let with = |succeeded, failed| Job {
            status: Some(JobStatus {
                succeeded,
                failed,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(job_outcome(&Job::default()), JobOutcome::Running);
        assert_eq!(job_outcome(&with(Some(1), None)), JobOutcome::Succeeded);
        assert_eq!(job_outcome(&with(None, Some(1))), JobOutcome::Failed);
        assert_eq!(job_outcome(&with(Some(0), Some(0))), JobOutcome::Running);
    }
}
