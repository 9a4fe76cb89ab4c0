//! Request dispatcher
//!
//! Backup, ClusterBackup, Restore and ClusterRestore share one reconcile
//! loop, written against [`DispatchRequest`]:
//!
//! - a Pending request gets its storage location resolved and exactly one
//!   worker Job created, then moves to Running
//! - a Running request follows its Job; the worker writes the terminal
//!   status itself, and the dispatcher only records a Job outcome the
//!   worker could not (crash, deadline, deletion)
//! - Completed and Failed requests are never touched again
//!
//! Jobs are watched, so a finished worker triggers a reconcile of its
//! owning request right away.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use stowage_common::crd::{
    Backup, BackupStorageLocation, ClusterBackup, ClusterRestore, RequestKind, RequestPhase,
    Restore,
};
use stowage_common::kube_utils::{patch_cluster_resource_status, patch_resource_status};
use stowage_common::location::{resolve_storage_location, KubeStorageLocationStore};
use stowage_common::{Error, OperatorConfig, FIELD_MANAGER, REQUEUE_ERROR_SECS};
use stowage_worker::requests::{
    BackupRequest, KubeRequestStore, RequestRef, RequestStore, RestoreRequest,
};
use stowage_worker::restore::source_ref;

use crate::context::ControllerContext;
use crate::job::{build_worker_job, job_outcome, owner_of, JobOutcome, JobOwner};
use crate::REQUEUE_SOURCE_NOT_READY_SECS;

/// Status fields the dispatcher writes
///
/// Merge-patched over the request's status, so fields the worker owns
/// (artifact location, conditions) are left alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatus {
    /// New phase
    pub phase: RequestPhase,
    /// Set when the worker is started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the request finishes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Generation the status was written for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchStatus {
    /// Status of a request whose worker was just started
    pub fn running(now: DateTime<Utc>, generation: Option<i64>) -> Self {
        Self {
            phase: RequestPhase::Running,
            started_at: Some(now),
            observed_generation: generation,
            ..Default::default()
        }
    }

    /// Terminal status
    pub fn finished(
        phase: RequestPhase,
        message: Option<String>,
        now: DateTime<Utc>,
        generation: Option<i64>,
    ) -> Self {
        Self {
            phase,
            completed_at: Some(now),
            observed_generation: generation,
            message,
            ..Default::default()
        }
    }
}

/// What the dispatcher needs from a request kind
pub trait DispatchRequest:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// Kind handled by this implementation
    const KIND: RequestKind;

    /// Current phase, `Pending` before any status was written
    fn phase(&self) -> RequestPhase;

    /// Parsed request timeout
    fn timeout(&self) -> Result<Option<Duration>, Error>;

    /// Storage location named by a backup
    fn storage_ref(&self) -> Option<&str>;

    /// Backup a restore reads from, `None` for backups
    fn source_backup(&self) -> Option<Result<RequestRef, Error>>;

    /// Identity of this request
    fn request_ref(&self) -> RequestRef {
        RequestRef::new(Self::KIND, self.name_any(), self.namespace())
    }

    /// Owner labels of this request's worker Job
    fn job_owner(&self) -> Result<JobOwner, Error> {
        let target = self.request_ref();
        let uid = self.uid().ok_or_else(|| {
            Error::internal_with_context("dispatcher", format!("{} has no UID", target))
        })?;
        Ok(JobOwner {
            kind: Self::KIND,
            name: target.name,
            namespace: target.namespace,
            uid,
        })
    }
}

impl DispatchRequest for Backup {
    const KIND: RequestKind = RequestKind::Backup;

    fn phase(&self) -> RequestPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.spec.timeout_duration()
    }

    fn storage_ref(&self) -> Option<&str> {
        self.spec.storage_ref.as_ref().map(|r| r.name.as_str())
    }

    fn source_backup(&self) -> Option<Result<RequestRef, Error>> {
        None
    }
}

impl DispatchRequest for ClusterBackup {
    const KIND: RequestKind = RequestKind::ClusterBackup;

    fn phase(&self) -> RequestPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.spec.backup.timeout_duration()
    }

    fn storage_ref(&self) -> Option<&str> {
        self.spec.backup.storage_ref.as_ref().map(|r| r.name.as_str())
    }

    fn source_backup(&self) -> Option<Result<RequestRef, Error>> {
        None
    }
}

impl DispatchRequest for Restore {
    const KIND: RequestKind = RequestKind::Restore;

    fn phase(&self) -> RequestPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.spec.timeout_duration()
    }

    fn storage_ref(&self) -> Option<&str> {
        None
    }

    fn source_backup(&self) -> Option<Result<RequestRef, Error>> {
        Some(source_ref(&RestoreRequest::from(self.clone())))
    }
}

impl DispatchRequest for ClusterRestore {
    const KIND: RequestKind = RequestKind::ClusterRestore;

    fn phase(&self) -> RequestPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.spec.restore.timeout_duration()
    }

    fn storage_ref(&self) -> Option<&str> {
        None
    }

    fn source_backup(&self) -> Option<Result<RequestRef, Error>> {
        Some(source_ref(&RestoreRequest::from(self.clone())))
    }
}

/// Cluster access used by the dispatcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DispatchClient: Send + Sync {
    /// The worker Job owned by a request, if one exists
    async fn find_worker_job(&self, owner: &JobOwner) -> Result<Option<Job>, Error>;

    /// Create a worker Job and return its generated name
    async fn create_job(&self, job: &Job) -> Result<String, Error>;

    /// Fresh phase of a request, `None` if it no longer exists
    async fn current_phase(&self, target: &RequestRef) -> Result<Option<RequestPhase>, Error>;

    /// Merge-patch a request's status
    async fn patch_status(&self, target: &RequestRef, status: &DispatchStatus)
        -> Result<(), Error>;

    /// Load the backup a restore reads from
    async fn get_source_backup(&self, source: &RequestRef)
        -> Result<Option<BackupRequest>, Error>;

    /// Resolve a named or default BackupStorageLocation
    async fn resolve_storage(&self, name: Option<String>)
        -> Result<BackupStorageLocation, Error>;
}

/// DispatchClient backed by the API server
pub struct KubeDispatchClient {
    client: Client,
    jobs: Api<Job>,
    requests: KubeRequestStore,
    locations: KubeStorageLocationStore,
}

impl KubeDispatchClient {
    /// Create a client dispatching Jobs into the operator namespace
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), &config.namespace),
            requests: KubeRequestStore::new(client.clone()),
            locations: KubeStorageLocationStore::new(client.clone()),
            client,
        }
    }
}

fn namespace_of(target: &RequestRef) -> Result<&str, Error> {
    target.namespace.as_deref().ok_or_else(|| {
        Error::validation_for_field(
            &target.name,
            "metadata.namespace",
            format!("{} must be namespaced", target.kind),
        )
    })
}

#[async_trait]
impl DispatchClient for KubeDispatchClient {
    async fn find_worker_job(&self, owner: &JobOwner) -> Result<Option<Job>, Error> {
        let params = ListParams::default().labels(&owner.uid_selector());
        let jobs = self.jobs.list(&params).await?;
        Ok(jobs.items.into_iter().find(|job| owner.owns(job)))
    }

    async fn create_job(&self, job: &Job) -> Result<String, Error> {
        let created = self.jobs.create(&PostParams::default(), job).await?;
        Ok(created.name_any())
    }

    async fn current_phase(&self, target: &RequestRef) -> Result<Option<RequestPhase>, Error> {
        if target.kind.is_backup() {
            let backup = self.requests.get_backup(target).await?;
            Ok(backup.map(|b| b.status.phase))
        } else {
            let restore = self.requests.get_restore(target).await?;
            Ok(restore.map(|r| r.status.phase))
        }
    }

    async fn patch_status(
        &self,
        target: &RequestRef,
        status: &DispatchStatus,
    ) -> Result<(), Error> {
        let client = &self.client;
        let name = &target.name;
        match target.kind {
            RequestKind::Backup => {
                patch_resource_status::<Backup>(client, name, namespace_of(target)?, status, FIELD_MANAGER)
                    .await?
            }
            RequestKind::Restore => {
                patch_resource_status::<Restore>(client, name, namespace_of(target)?, status, FIELD_MANAGER)
                    .await?
            }
            RequestKind::ClusterBackup => {
                patch_cluster_resource_status::<ClusterBackup>(client, name, status, FIELD_MANAGER)
                    .await?
            }
            RequestKind::ClusterRestore => {
                patch_cluster_resource_status::<ClusterRestore>(client, name, status, FIELD_MANAGER)
                    .await?
            }
        }
        Ok(())
    }

    async fn get_source_backup(
        &self,
        source: &RequestRef,
    ) -> Result<Option<BackupRequest>, Error> {
        self.requests.get_backup(source).await
    }

    async fn resolve_storage(
        &self,
        name: Option<String>,
    ) -> Result<BackupStorageLocation, Error> {
        resolve_storage_location(&self.locations, name.as_deref()).await
    }
}

fn noun(kind: RequestKind) -> &'static str {
    if kind.is_backup() {
        "backup"
    } else {
        "restore"
    }
}

/// Reconcile a request of any kind
#[instrument(skip(request, ctx), fields(kind = R::KIND.as_str(), request = %request.name_any()))]
pub async fn reconcile<R: DispatchRequest>(
    request: Arc<R>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, Error> {
    let target = request.request_ref();
    let generation = request.meta().generation;
    let dispatch = ctx.dispatch.as_ref();

    if request.meta().deletion_timestamp.is_some() {
        debug!("request is being deleted");
        return Ok(Action::await_change());
    }
    let phase = request.phase();
    if phase.is_terminal() {
        debug!(%phase, "request already finished");
        return Ok(Action::await_change());
    }

    let owner = request.job_owner()?;
    if let Some(job) = dispatch.find_worker_job(&owner).await? {
        let (phase, message) = match job_outcome(&job) {
            JobOutcome::Running => {
                debug!(job = %job.name_any(), "worker still running");
                return Ok(Action::await_change());
            }
            JobOutcome::Succeeded => (RequestPhase::Completed, None),
            JobOutcome::Failed => (
                RequestPhase::Failed,
                Some(format!("{} job failed", noun(R::KIND))),
            ),
        };
        return finish(dispatch, &target, generation, phase, message).await;
    }

    if phase == RequestPhase::Running {
        warn!("worker job disappeared before the request finished");
        let message = format!("{} worker job not found", noun(R::KIND));
        return finish(dispatch, &target, generation, RequestPhase::Failed, Some(message)).await;
    }

    start_worker(request.as_ref(), &target, &owner, &ctx).await
}

/// Resolve storage, create the worker Job and mark the request Running
async fn start_worker<R: DispatchRequest>(
    request: &R,
    target: &RequestRef,
    owner: &JobOwner,
    ctx: &ControllerContext,
) -> Result<Action, Error> {
    let dispatch = ctx.dispatch.as_ref();
    let generation = request.meta().generation;
    let fail = |message: String| finish(dispatch, target, generation, RequestPhase::Failed, Some(message));

    let storage_ref = match request.source_backup() {
        None => request.storage_ref().map(str::to_string),
        Some(Err(e)) => return fail(e.to_string()).await,
        Some(Ok(source)) => {
            let Some(backup) = dispatch.get_source_backup(&source).await? else {
                return fail(format!("source {} not found", source)).await;
            };
            let ready = backup
                .status
                .artifact_location
                .as_deref()
                .is_some_and(|l| !l.is_empty());
            if !ready {
                if backup.status.phase == RequestPhase::Failed {
                    return fail(format!("source {} failed", source)).await;
                }
                debug!(source = %source, "source backup artifact not ready yet");
                return Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_SOURCE_NOT_READY_SECS,
                )));
            }
            backup.spec.storage_ref.map(|r| r.name)
        }
    };

    let location = match dispatch.resolve_storage(storage_ref).await {
        Ok(location) => location,
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => return fail(e.to_string()).await,
    };

    let job = match request
        .timeout()
        .and_then(|timeout| build_worker_job(owner, &ctx.config, &location, timeout))
    {
        Ok(job) => job,
        Err(e) => return fail(e.to_string()).await,
    };

    let job_name = dispatch.create_job(&job).await?;
    info!(job = %job_name, location = %location.name_any(), "worker job created");

    dispatch
        .patch_status(target, &DispatchStatus::running(Utc::now(), generation))
        .await?;
    Ok(Action::await_change())
}

/// Write a terminal status unless the request already has one
async fn finish(
    dispatch: &dyn DispatchClient,
    target: &RequestRef,
    generation: Option<i64>,
    phase: RequestPhase,
    message: Option<String>,
) -> Result<Action, Error> {
    match dispatch.current_phase(target).await? {
        None => {
            debug!("request no longer exists");
            return Ok(Action::await_change());
        }
        Some(current) if current.is_terminal() => {
            debug!(%current, "worker already recorded the outcome");
            return Ok(Action::await_change());
        }
        Some(_) => {}
    }

    match &message {
        Some(message) if phase == RequestPhase::Failed => {
            warn!(%phase, %message, "request failed")
        }
        _ => info!(%phase, "request finished"),
    }
    let status = DispatchStatus::finished(phase, message, Utc::now(), generation);
    dispatch.patch_status(target, &status).await?;
    Ok(Action::await_change())
}

/// Error policy shared by the request controllers
pub fn error_policy<R: DispatchRequest>(
    request: Arc<R>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    error!(
        ?error,
        kind = %R::KIND,
        request = %request.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}

/// Map a worker Job event to the request that owns it
pub fn request_for_job<R: DispatchRequest>(job: Job) -> Option<ObjectRef<R>> {
    let (kind, name, namespace) = owner_of(&job)?;
    if kind != R::KIND {
        return None;
    }
    let obj = ObjectRef::new(&name);
    Some(match namespace {
        Some(ns) if kind.is_namespaced() => obj.within(&ns),
        _ => obj,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;
    use kube::core::ObjectMeta;
    use std::sync::Mutex;
    use stowage_common::crd::{
        BackupSpec, BackupStatus, BackupStorageLocationSpec, ClusterRestoreSpec,
        LocalObjectReference, NfsLocationSpec, RestoreSourceRef, RestoreSpec, RestoreStatus,
        StorageType,
    };
    use stowage_worker::export::BackupScope;

    fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            uid: Some(format!("uid-{}", name)),
            generation: Some(2),
            ..Default::default()
        }
    }

    fn backup(phase: Option<RequestPhase>) -> Arc<Backup> {
        Arc::new(Backup {
            metadata: meta("nightly", Some("apps")),
            spec: BackupSpec::default(),
            status: phase.map(|phase| BackupStatus {
                phase,
                ..Default::default()
            }),
        })
    }

    fn restore(source: RestoreSourceRef) -> Arc<Restore> {
        Arc::new(Restore {
            metadata: meta("recover", Some("apps")),
            spec: RestoreSpec {
                source_ref: source,
                ..Default::default()
            },
            status: None,
        })
    }

    fn cluster_restore(source: RestoreSourceRef) -> Arc<ClusterRestore> {
        Arc::new(ClusterRestore {
            metadata: meta("recover-all", None),
            spec: ClusterRestoreSpec {
                restore: RestoreSpec {
                    source_ref: source,
                    ..Default::default()
                },
            },
            status: Some(RestoreStatus::default()),
        })
    }

    fn source(kind: &str, namespace: Option<&str>) -> RestoreSourceRef {
        RestoreSourceRef {
            kind: kind.to_string(),
            name: "nightly".to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    fn source_backup(phase: RequestPhase, artifact: Option<&str>) -> BackupRequest {
        BackupRequest {
            target: RequestRef::new(RequestKind::Backup, "nightly", Some("apps".to_string())),
            spec: BackupSpec {
                storage_ref: Some(LocalObjectReference {
                    name: "archive".to_string(),
                }),
                ..Default::default()
            },
            scope: BackupScope::Namespace("apps".to_string()),
            status: BackupStatus {
                phase,
                artifact_location: artifact.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn nfs_location() -> BackupStorageLocation {
        BackupStorageLocation {
            metadata: ObjectMeta {
                name: Some("archive".to_string()),
                ..Default::default()
            },
            spec: BackupStorageLocationSpec {
                type_: StorageType::Nfs,
                nfs: Some(NfsLocationSpec {
                    server: "nfs.local".to_string(),
                    path: "/exports".to_string(),
                    ..Default::default()
                }),
                default: true,
                ..Default::default()
            },
            status: None,
        }
    }

    fn job_with(succeeded: Option<i32>, failed: Option<i32>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("backup-nightly-x7k2p".to_string()),
                ..Default::default()
            },
            status: Some(JobStatus {
                succeeded,
                failed,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Captures every status the dispatcher writes
    #[derive(Clone, Default)]
    struct StatusCapture(Arc<Mutex<Vec<DispatchStatus>>>);

    impl StatusCapture {
        fn install(&self, mock: &mut MockDispatchClient) {
            let captured = self.0.clone();
            mock.expect_patch_status().returning(move |_, status| {
                captured.lock().unwrap().push(status.clone());
                Ok(())
            });
        }

        fn single(&self) -> DispatchStatus {
            let statuses = self.0.lock().unwrap();
            assert_eq!(statuses.len(), 1, "expected exactly one status write");
            statuses[0].clone()
        }
    }

    fn ctx(mock: MockDispatchClient) -> Arc<ControllerContext> {
        Arc::new(ControllerContext::for_testing(
            Arc::new(mock),
            OperatorConfig::default(),
        ))
    }

    // ==========================================================================
    // Story Tests: Dispatching workers
    // ==========================================================================

    /// Story: A new backup gets one worker Job and moves to Running
    #[tokio::test]
    async fn story_new_backup_starts_worker() {
        let mut mock = MockDispatchClient::new();
        let created: Arc<Mutex<Vec<Job>>> = Arc::default();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job()
            .withf(|owner| owner.uid == "uid-nightly" && owner.kind == RequestKind::Backup)
            .returning(|_| Ok(None));
        mock.expect_resolve_storage()
            .withf(|name| name.is_none())
            .returning(|_| Ok(nfs_location()));
        let c = created.clone();
        mock.expect_create_job().times(1).returning(move |job| {
            c.lock().unwrap().push(job.clone());
            Ok("backup-nightly-x7k2p".to_string())
        });
        statuses.install(&mut mock);

        let action = reconcile(backup(None), ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = statuses.single();
        assert_eq!(status.phase, RequestPhase::Running);
        assert!(status.started_at.is_some());
        assert_eq!(status.observed_generation, Some(2));

        let jobs = created.lock().unwrap();
        let labels = jobs[0].metadata.labels.as_ref().unwrap();
        assert_eq!(labels["stowage.dev/owner-namespace"], "apps");
        let pod = jobs[0].spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.volumes.as_ref().unwrap()[0].name, "nfs-storage");
    }

    /// Story: A backup with nowhere to write fails without a Job
    #[tokio::test]
    async fn story_unresolvable_storage_fails_request() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_resolve_storage().returning(|_| {
            Err(Error::storage_resolution(
                "no default BackupStorageLocation set",
            ))
        });
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Pending)));
        mock.expect_create_job().never();
        statuses.install(&mut mock);

        reconcile(backup(None), ctx(mock)).await.unwrap();

        let status = statuses.single();
        assert_eq!(status.phase, RequestPhase::Failed);
        assert_eq!(
            status.message.as_deref(),
            Some("storage location error: no default BackupStorageLocation set")
        );
        assert!(status.completed_at.is_some());
    }

    /// Story: Job creation failures are retried, not recorded
    #[tokio::test]
    async fn story_job_creation_failure_is_returned() {
        let mut mock = MockDispatchClient::new();
        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_resolve_storage().returning(|_| Ok(nfs_location()));
        mock.expect_create_job()
            .returning(|_| Err(Error::internal("api server unavailable")));
        mock.expect_patch_status().never();

        let err = reconcile(backup(None), ctx(mock)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    /// Story: A failed worker Job fails the request
    #[tokio::test]
    async fn story_failed_job_fails_request() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job()
            .returning(|_| Ok(Some(job_with(None, Some(1)))));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Running)));
        statuses.install(&mut mock);

        reconcile(backup(Some(RequestPhase::Running)), ctx(mock))
            .await
            .unwrap();

        let status = statuses.single();
        assert_eq!(status.phase, RequestPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("backup job failed"));
    }

    /// Story: A succeeded Job completes a request the worker left Running
    #[tokio::test]
    async fn story_succeeded_job_completes_request() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job()
            .returning(|_| Ok(Some(job_with(Some(1), None))));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Running)));
        statuses.install(&mut mock);

        reconcile(backup(Some(RequestPhase::Running)), ctx(mock))
            .await
            .unwrap();

        let status = statuses.single();
        assert_eq!(status.phase, RequestPhase::Completed);
        assert_eq!(status.message, None);
    }

    /// Story: The worker's own terminal status wins over a stale cache
    #[tokio::test]
    async fn story_worker_status_is_not_overwritten() {
        let mut mock = MockDispatchClient::new();
        mock.expect_find_worker_job()
            .returning(|_| Ok(Some(job_with(Some(1), None))));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Failed)));
        mock.expect_patch_status().never();

        reconcile(backup(Some(RequestPhase::Running)), ctx(mock))
            .await
            .unwrap();
    }

    /// Story: Finished requests are never dispatched again
    #[tokio::test]
    async fn story_finished_request_is_left_alone() {
        let mock = MockDispatchClient::new();
        let ctx = ctx(mock);

        for phase in [RequestPhase::Completed, RequestPhase::Failed] {
            let action = reconcile(backup(Some(phase)), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    /// Story: A running worker is simply awaited
    #[tokio::test]
    async fn story_running_worker_is_awaited() {
        let mut mock = MockDispatchClient::new();
        mock.expect_find_worker_job()
            .returning(|_| Ok(Some(job_with(None, None))));
        mock.expect_patch_status().never();
        mock.expect_create_job().never();

        let action = reconcile(backup(Some(RequestPhase::Running)), ctx(mock))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: A Running request whose Job vanished is failed, not re-run
    #[tokio::test]
    async fn story_vanished_job_fails_request() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Running)));
        mock.expect_create_job().never();
        statuses.install(&mut mock);

        reconcile(backup(Some(RequestPhase::Running)), ctx(mock))
            .await
            .unwrap();

        assert_eq!(
            statuses.single().message.as_deref(),
            Some("backup worker job not found")
        );
    }

    #[tokio::test]
    async fn test_deleting_request_is_ignored() {
        let mock = MockDispatchClient::new();
        let mut deleting = (*backup(None)).clone();
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
        );

        let action = reconcile(Arc::new(deleting), ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    // ==========================================================================
    // Story Tests: Restores and their source backup
    // ==========================================================================

    /// Story: A restore waits until its source backup has an artifact
    #[tokio::test]
    async fn story_restore_waits_for_source_artifact() {
        let mut mock = MockDispatchClient::new();
        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_get_source_backup()
            .returning(|_| Ok(Some(source_backup(RequestPhase::Running, None))));
        mock.expect_create_job().never();
        mock.expect_patch_status().never();

        let action = reconcile(restore(source("Backup", None)), ctx(mock))
            .await
            .unwrap();
        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(REQUEUE_SOURCE_NOT_READY_SECS))
        );
    }

    /// Story: A restore reads from the storage its source backup wrote to
    #[tokio::test]
    async fn story_restore_uses_source_backup_storage() {
        let mut mock = MockDispatchClient::new();
        let created: Arc<Mutex<Vec<Job>>> = Arc::default();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_get_source_backup()
            .withf(|source| {
                source.kind == RequestKind::Backup && source.namespace.as_deref() == Some("apps")
            })
            .returning(|_| {
                Ok(Some(source_backup(
                    RequestPhase::Completed,
                    Some("nfs://nfs.local/exports/c1/backup/apps/nightly/20260101T000000Z/backup.tar.gz"),
                )))
            });
        mock.expect_resolve_storage()
            .withf(|name| name.as_deref() == Some("archive"))
            .returning(|_| Ok(nfs_location()));
        let c = created.clone();
        mock.expect_create_job().returning(move |job| {
            c.lock().unwrap().push(job.clone());
            Ok("restore-recover-q8w1z".to_string())
        });
        statuses.install(&mut mock);

        reconcile(restore(source("Backup", None)), ctx(mock))
            .await
            .unwrap();

        assert_eq!(statuses.single().phase, RequestPhase::Running);
        let jobs = created.lock().unwrap();
        assert_eq!(
            jobs[0].metadata.generate_name.as_deref(),
            Some("restore-recover-")
        );
    }

    /// Story: A restore of a missing backup fails
    #[tokio::test]
    async fn story_missing_source_backup_fails_restore() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_get_source_backup().returning(|_| Ok(None));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Pending)));
        statuses.install(&mut mock);

        reconcile(restore(source("ClusterBackup", None)), ctx(mock))
            .await
            .unwrap();

        assert_eq!(
            statuses.single().message.as_deref(),
            Some("source ClusterBackup nightly not found")
        );
    }

    /// Story: A restore of a failed backup fails instead of waiting forever
    #[tokio::test]
    async fn story_failed_source_backup_fails_restore() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_get_source_backup()
            .returning(|_| Ok(Some(source_backup(RequestPhase::Failed, None))));
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Pending)));
        statuses.install(&mut mock);

        reconcile(restore(source("Backup", Some("apps"))), ctx(mock))
            .await
            .unwrap();

        assert_eq!(
            statuses.single().message.as_deref(),
            Some("source Backup apps/nightly failed")
        );
    }

    /// Story: A cluster restore must say which namespace its Backup lives in
    #[tokio::test]
    async fn story_cluster_restore_requires_source_namespace() {
        let mut mock = MockDispatchClient::new();
        let statuses = StatusCapture::default();

        mock.expect_find_worker_job().returning(|_| Ok(None));
        mock.expect_get_source_backup().never();
        mock.expect_current_phase()
            .returning(|_| Ok(Some(RequestPhase::Pending)));
        statuses.install(&mut mock);

        reconcile(cluster_restore(source("Backup", None)), ctx(mock))
            .await
            .unwrap();

        let status = statuses.single();
        assert_eq!(status.phase, RequestPhase::Failed);
        assert!(status
            .message
            .unwrap()
            .contains("sourceRef.namespace is required for Backup"));
    }

    // ==========================================================================
    // Job watch mapping
    // ==========================================================================

    #[test]
    fn test_request_for_job_maps_owner() {
        let owner = JobOwner {
            kind: RequestKind::Restore,
            name: "recover".to_string(),
            namespace: Some("apps".to_string()),
            uid: "uid-recover".to_string(),
        };
        let job = Job {
            metadata: ObjectMeta {
                labels: Some(owner.labels()),
                ..Default::default()
            },
            ..Default::default()
        };

        let obj = request_for_job::<Restore>(job.clone()).unwrap();
        assert_eq!(obj.name, "recover");
        assert_eq!(obj.namespace.as_deref(), Some("apps"));

        assert!(request_for_job::<Backup>(job.clone()).is_none());
        assert!(request_for_job::<ClusterRestore>(job).is_none());
        assert!(request_for_job::<Backup>(Job::default()).is_none());
    }

    #[test]
    fn test_dispatch_status_serializes_only_set_fields() {
        let status = DispatchStatus::running(Utc::now(), Some(3));
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Running");
        assert_eq!(value["observedGeneration"], 3);
        assert!(value.get("message").is_none());
        assert!(value.get("completedAt").is_none());
        assert!(value.get("artifactLocation").is_none());
    }
}
