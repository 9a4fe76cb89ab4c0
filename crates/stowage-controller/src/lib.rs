//! Stowage controllers
//!
//! The request dispatcher turns Backup, ClusterBackup, Restore and
//! ClusterRestore objects into worker Jobs. Two small controllers keep
//! BackupStorageLocation and RemoteCluster status current.

#![deny(missing_docs)]

pub mod context;
pub mod dispatch;
pub mod job;
pub mod remote_cluster_controller;
pub mod storage_location_controller;

pub use context::ControllerContext;
pub use dispatch::{error_policy, reconcile, request_for_job, DispatchRequest};

/// Requeue interval while a restore's source backup has no artifact yet
pub const REQUEUE_SOURCE_NOT_READY_SECS: u64 = 10;

/// How often RemoteClusters are probed
pub const REMOTE_CLUSTER_RESYNC_SECS: u64 = 300;
