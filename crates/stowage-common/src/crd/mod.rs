//! Custom Resource Definitions for Stowage
//!
//! This module contains all CRD definitions used by the Stowage operator.

mod backup;
mod remote_cluster;
mod restore;
mod storage_location;
mod types;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use backup::{
    Backup, BackupSpec, BackupStatus, ClusterBackup, ClusterBackupSpec, ExportFormat, ExportSpec,
    NamespaceSelector, ResourceSelector, SnapshotSpec,
};
pub use remote_cluster::{
    RemoteAuthMethod, RemoteCluster, RemoteClusterAuth, RemoteClusterSpec, RemoteClusterStatus,
};
pub use restore::{
    ClusterRestore, ClusterRestoreSpec, OverwritePolicy, Restore, RestoreSourceRef, RestoreSpec,
    RestoreStatus, SourceKind,
};
pub use storage_location::{
    BackupStorageLocation, BackupStorageLocationSpec, BackupStorageLocationStatus,
    NfsLocationSpec, S3LocationSpec, StorageLocationPhase, StorageType,
};
pub use types::{
    parse_duration, Condition, ConditionStatus, ExecutionMode, LabelSelector,
    LabelSelectorOperator, LabelSelectorRequirement, LocalObjectReference, RequestKind,
    RequestPhase, SecretReference,
};

/// Every CRD served by the operator, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        BackupStorageLocation::crd(),
        RemoteCluster::crd(),
        Backup::crd(),
        ClusterBackup::crd(),
        Restore::crd(),
        ClusterRestore::crd(),
    ]
}
