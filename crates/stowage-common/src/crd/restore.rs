//! Restore and ClusterRestore Custom Resource Definitions
//!
//! A restore replays the archive of a completed Backup or ClusterBackup,
//! optionally onto a peer cluster and with namespaces remapped.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    parse_duration, Condition, ExecutionMode, LocalObjectReference, RequestKind, RequestPhase,
};
use crate::Error;

/// What to do when a restored object already exists
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Replace the existing object with the archived one
    #[default]
    Replace,
    /// Merge-patch the archived object onto the existing one
    Merge,
    /// Leave the existing object untouched
    Skip,
}

impl std::fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "Replace"),
            Self::Merge => write!(f, "Merge"),
            Self::Skip => write!(f, "Skip"),
        }
    }
}

/// Backup kinds a restore can read from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Namespaced `Backup`
    Backup,
    /// Cluster-scoped `ClusterBackup`
    ClusterBackup,
}

impl From<SourceKind> for RequestKind {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Backup => RequestKind::Backup,
            SourceKind::ClusterBackup => RequestKind::ClusterBackup,
        }
    }
}

/// Reference to the backup being restored
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSourceRef {
    /// `Backup` or `ClusterBackup`
    pub kind: String,

    /// Name of the backup
    pub name: String,

    /// Namespace of a `Backup` source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl RestoreSourceRef {
    /// Parse the source kind
    pub fn source_kind(&self) -> Result<SourceKind, Error> {
        match self.kind.as_str() {
            "Backup" => Ok(SourceKind::Backup),
            "ClusterBackup" => Ok(SourceKind::ClusterBackup),
            other => Err(Error::unsupported("sourceRef.kind", other)),
        }
    }
}

/// Status shared by Restore and ClusterRestore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    /// Current phase
    #[serde(default)]
    pub phase: RequestPhase,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When the worker was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the worker finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a Restore
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "Restore",
    plural = "restores",
    shortname = "rst",
    namespaced,
    status = "RestoreStatus",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Backup to restore from
    pub source_ref: RestoreSourceRef,

    /// RemoteCluster to restore into (local cluster when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cluster_ref: Option<LocalObjectReference>,

    /// Original namespace to target namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,

    /// Conflict handling for existing objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite_policy: Option<OverwritePolicy>,

    /// Informational execution mode
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Worker deadline such as `30m` or `1h30m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl RestoreSpec {
    /// Parsed timeout, if one is configured
    pub fn timeout_duration(&self) -> Result<Option<Duration>, Error> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// Specification for a ClusterRestore
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "ClusterRestore",
    plural = "clusterrestores",
    shortname = "crst",
    status = "RestoreStatus",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceRef.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRestoreSpec {
    /// Options shared with namespaced restores
    #[serde(flatten)]
    pub restore: RestoreSpec,
}
