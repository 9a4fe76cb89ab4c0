//! Process-wide operator configuration
//!
//! Everything the controllers and workers need from the pod environment is
//! read once into an [`OperatorConfig`] and passed down explicitly.

use std::path::PathBuf;
use std::time::Duration;

/// Namespace the operator runs in when `POD_NAMESPACE` is unset
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "stowage-system";

/// Service account used by worker Jobs when `POD_SERVICE_ACCOUNT` is unset
pub const DEFAULT_SERVICE_ACCOUNT: &str = "stowage-controller";

/// Worker image when `OPERATOR_IMAGE` is unset
pub const DEFAULT_OPERATOR_IMAGE: &str = "stowage:latest";

/// Cluster identity when `CLUSTER_ID` is unset
pub const DEFAULT_CLUSTER_ID: &str = "cluster-unknown";

/// Local mount point of NFS storage inside worker pods
pub const DEFAULT_NFS_MOUNT_PATH: &str = "/data";

/// Overall deadline of a single worker execution
pub const WORKER_DEADLINE: Duration = Duration::from_secs(2 * 60 * 60);

/// Seconds a finished worker Job is kept before garbage collection
pub const JOB_TTL_AFTER_FINISHED_SECS: i32 = 3600;

/// Operator configuration derived from the pod environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace holding worker Jobs and default secrets
    pub namespace: String,
    /// Service account assigned to worker pods
    pub service_account: String,
    /// Image used for worker pods
    pub image: String,
    /// Identity of the cluster this operator runs in
    pub cluster_id: String,
    /// Where NFS storage is mounted in worker pods
    pub nfs_mount_path: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            image: DEFAULT_OPERATOR_IMAGE.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            nfs_mount_path: PathBuf::from(DEFAULT_NFS_MOUNT_PATH),
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            namespace: get("POD_NAMESPACE", DEFAULT_OPERATOR_NAMESPACE),
            service_account: get("POD_SERVICE_ACCOUNT", DEFAULT_SERVICE_ACCOUNT),
            image: get("OPERATOR_IMAGE", DEFAULT_OPERATOR_IMAGE),
            cluster_id: get("CLUSTER_ID", DEFAULT_CLUSTER_ID),
            nfs_mount_path: PathBuf::from(get("NFS_MOUNT_PATH", DEFAULT_NFS_MOUNT_PATH)),
        }
    }
}
