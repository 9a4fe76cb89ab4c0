//! Common types for Stowage: CRDs, errors, configuration and cluster utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod location;
pub mod remote;
pub mod telemetry;
pub mod yaml;

pub use config::OperatorConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every Stowage CRD
pub const API_GROUP: &str = "stowage.dev";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "stowage-controller";

/// Label carrying the UID of the request that owns a worker Job
pub const OWNER_UID_LABEL: &str = "stowage.dev/owner-uid";

/// Label carrying the kind of the request that owns a worker Job
pub const OWNER_KIND_LABEL: &str = "stowage.dev/owner-kind";

/// Label carrying the name of the request that owns a worker Job
pub const OWNER_NAME_LABEL: &str = "stowage.dev/owner-name";

/// Label carrying the namespace of the request that owns a worker Job (namespaced requests only)
pub const OWNER_NAMESPACE_LABEL: &str = "stowage.dev/owner-namespace";

/// Label placed on VolumeSnapshots created for a backup
pub const BACKUP_NAME_LABEL: &str = "stowage.dev/backup-name";

/// Requeue interval after a reconcile error (5 seconds)
pub const REQUEUE_ERROR_SECS: u64 = 5;
