//! Controller runner - builds controller futures for each resource family
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use stowage_common::crd::{
    Backup, BackupStorageLocation, ClusterBackup, ClusterRestore, RemoteCluster, Restore,
};
use stowage_common::OWNER_UID_LABEL;
use stowage_controller::{
    error_policy, reconcile, remote_cluster_controller as remote_ctrl, request_for_job,
    storage_location_controller as location_ctrl, ControllerContext, DispatchRequest,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One request controller, woken by its own objects and by its worker Jobs
fn request_controller<R>(
    api: Api<R>,
    jobs: Api<Job>,
    ctx: Arc<ControllerContext>,
    name: &'static str,
) -> ControllerFuture
where
    R: DispatchRequest,
{
    Box::pin(
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .watches(
                jobs,
                WatcherConfig::default()
                    .timeout(WATCH_TIMEOUT_SECS)
                    .labels(OWNER_UID_LABEL),
                request_for_job::<R>,
            )
            .shutdown_on_signal()
            .run(reconcile::<R>, error_policy::<R>, ctx)
            .for_each(log_reconcile_result(name)),
    )
}

/// Build the request dispatchers (Backup, ClusterBackup, Restore, ClusterRestore)
pub fn build_request_controllers(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> Vec<ControllerFuture> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), &ctx.config.namespace);

    tracing::info!(job_namespace = %ctx.config.namespace, "- Backup/Restore dispatchers");

    vec![
        request_controller(
            Api::<Backup>::all(client.clone()),
            jobs.clone(),
            ctx.clone(),
            "Backup",
        ),
        request_controller(
            Api::<ClusterBackup>::all(client.clone()),
            jobs.clone(),
            ctx.clone(),
            "ClusterBackup",
        ),
        request_controller(
            Api::<Restore>::all(client.clone()),
            jobs.clone(),
            ctx.clone(),
            "Restore",
        ),
        request_controller(Api::<ClusterRestore>::all(client), jobs, ctx, "ClusterRestore"),
    ]
}

/// Build the BackupStorageLocation and RemoteCluster controllers
pub fn build_auxiliary_controllers(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> Vec<ControllerFuture> {
    let locations: Api<BackupStorageLocation> = Api::all(client.clone());
    let remotes: Api<RemoteCluster> = Api::all(client);

    tracing::info!("- BackupStorageLocation controller");
    tracing::info!("- RemoteCluster controller");

    vec![
        Box::pin(
            Controller::new(
                locations,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            )
            .shutdown_on_signal()
            .run(
                location_ctrl::reconcile,
                location_ctrl::error_policy,
                ctx.clone(),
            )
            .for_each(log_reconcile_result("BackupStorageLocation")),
        ),
        Box::pin(
            Controller::new(remotes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .shutdown_on_signal()
                .run(remote_ctrl::reconcile, remote_ctrl::error_policy, ctx)
                .for_each(log_reconcile_result("RemoteCluster")),
        ),
    ]
}

/// Create a closure that logs reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
