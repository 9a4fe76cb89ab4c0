//! Stowage Operator - Kubernetes backup and restore

use std::sync::Arc;

use clap::{Parser, Subcommand};

use stowage_common::kube_utils::create_client;
use stowage_common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use stowage_common::OperatorConfig;
use stowage_controller::ControllerContext;
use stowage_operator::controller_runner::{build_auxiliary_controllers, build_request_controllers};
use stowage_operator::crds::{crd_manifests, ensure_crds_installed};
use stowage_worker::{run_worker, WorkerArgs, WorkerMode};

/// Stowage - backup and restore of Kubernetes resources and volumes
#[derive(Parser, Debug)]
#[command(name = "stowage", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Run a single worker instead of the controllers (backup-worker, restore-worker)
    #[arg(long)]
    mode: Option<String>,

    /// Kind of the request a worker runs for
    #[arg(long, requires = "mode")]
    worker_kind: Option<String>,

    /// Name of the request a worker runs for
    #[arg(long, requires = "mode")]
    worker_name: Option<String>,

    /// Namespace of the request a worker runs for (empty for cluster kinds)
    #[arg(long, requires = "mode")]
    worker_namespace: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the CRDs, then dispatches Backup, ClusterBackup, Restore and
    /// ClusterRestore requests to worker Jobs and keeps
    /// BackupStorageLocation and RemoteCluster status current.
    Controller,
}

impl Cli {
    /// Worker arguments, if this invocation runs a worker
    fn worker_args(&self) -> anyhow::Result<Option<WorkerArgs>> {
        let Some(mode) = self.mode.as_deref() else {
            return Ok(None);
        };
        let mode: WorkerMode = mode.parse()?;
        let kind = self
            .worker_kind
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--worker-kind is required with --mode"))?
            .parse()?;
        let name = self
            .worker_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--worker-name is required with --mode"))?;
        let namespace = self.worker_namespace.clone().filter(|ns| !ns.is_empty());
        Ok(Some(WorkerArgs {
            mode,
            kind,
            name,
            namespace,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    let worker = cli.worker_args()?;
    let role = worker
        .as_ref()
        .map(|args| args.mode.as_str())
        .unwrap_or("controller");
    init_telemetry(TelemetryConfig::for_role(role))
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let result = match (worker, cli.command) {
        (Some(args), _) => run_worker_process(args).await,
        (None, Some(Commands::Controller) | None) => run_controller().await,
    };

    shutdown_telemetry();
    result
}

/// Run one backup or restore and exit
async fn run_worker_process(args: WorkerArgs) -> anyhow::Result<()> {
    let config = OperatorConfig::from_env();
    let client = create_client().await?;
    run_worker(client, &config, &args).await?;
    tracing::info!(mode = %args.mode, name = %args.name, "worker finished");
    Ok(())
}

async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Stowage controller starting...");

    let config = OperatorConfig::from_env();
    let client = create_client().await?;

    // Operator installs its own CRDs on startup
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(ControllerContext::new(client.clone(), config));

    tracing::info!("Starting controllers:");
    let mut controllers = build_request_controllers(client.clone(), ctx.clone());
    controllers.extend(build_auxiliary_controllers(client, ctx));

    // Every controller stops on SIGTERM; wait for all of them to drain
    futures::future::join_all(controllers).await;

    tracing::info!("Stowage controller shutting down");
    Ok(())
}
