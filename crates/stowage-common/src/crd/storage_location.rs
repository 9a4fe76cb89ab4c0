//! BackupStorageLocation Custom Resource Definition
//!
//! A BackupStorageLocation names where archives are written: an
//! S3-compatible bucket or an NFS export mounted into worker pods.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, LocalObjectReference, SecretReference};

/// Storage backend type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// S3-compatible object storage
    #[default]
    S3,
    /// NFS export mounted into worker pods
    Nfs,
}

impl StorageType {
    /// Lowercase name used in archive metadata and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Nfs => "nfs",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// S3 location configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3LocationSpec {
    /// Custom endpoint for S3-compatible storage (e.g., MinIO)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// Key prefix prepended to every archive key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Region (default: us-east-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Use path-style addressing (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,

    /// Skip TLS certificate verification
    #[serde(default, rename = "insecureSkipTLS")]
    pub insecure_skip_tls: bool,

    /// PEM-encoded CA bundle for the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    /// Secret with `accessKey`, `secretKey` and optional `sessionToken`
    #[serde(default)]
    pub secret_ref: SecretReference,
}

/// NFS location configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NfsLocationSpec {
    /// NFS server host
    #[serde(default)]
    pub server: String,

    /// Exported path on the server
    #[serde(default)]
    pub path: String,

    /// PVC backed by the export (informational)
    #[serde(default, rename = "pvcRef", skip_serializing_if = "Option::is_none")]
    pub pvc_ref: Option<LocalObjectReference>,

    /// Mount the export read-only
    #[serde(default)]
    pub read_only: bool,

    /// Mount options (informational)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,

    /// Credentials for the export (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret_ref: Option<SecretReference>,
}

/// Phase of a BackupStorageLocation
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StorageLocationPhase {
    /// Not yet validated
    #[default]
    Pending,
    /// Configuration is complete
    Available,
    /// Configuration is incomplete
    Unavailable,
}

impl std::fmt::Display for StorageLocationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Available => write!(f, "Available"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Status of a BackupStorageLocation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocationStatus {
    /// Current phase
    #[serde(default)]
    pub phase: StorageLocationPhase,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When the configuration was last checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a BackupStorageLocation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "BackupStorageLocation",
    plural = "backupstoragelocations",
    shortname = "bsl",
    status = "BackupStorageLocationStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Default","type":"boolean","jsonPath":".spec.default"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocationSpec {
    /// Backend type
    #[serde(rename = "type")]
    pub type_: StorageType,

    /// S3 settings (when type is s3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3LocationSpec>,

    /// NFS settings (when type is nfs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsLocationSpec>,

    /// Used when a request names no location
    #[serde(default)]
    pub default: bool,
}

impl BackupStorageLocationSpec {
    /// Check that the typed section for this backend is present and complete
    pub fn validate(&self) -> Result<(), String> {
        match self.type_ {
            StorageType::S3 => match &self.s3 {
                None => Err("s3 configuration is required for type s3".to_string()),
                Some(s3) if s3.bucket.is_empty() => Err("s3.bucket is required".to_string()),
                Some(_) => Ok(()),
            },
            StorageType::Nfs => match &self.nfs {
                None => Err("nfs configuration is required for type nfs".to_string()),
                Some(nfs) if nfs.server.is_empty() || nfs.path.is_empty() => {
                    Err("nfs.server and nfs.path are required".to_string())
                }
                Some(_) => Ok(()),
            },
        }
    }
}
