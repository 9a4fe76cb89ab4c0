//! Backup and ClusterBackup Custom Resource Definitions
//!
//! A `Backup` captures the resources of its own namespace. A `ClusterBackup`
//! spans a computed namespace set and, optionally, cluster-scoped resources.
//! Both share [`BackupSpec`] and [`BackupStatus`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    parse_duration, Condition, ExecutionMode, LabelSelector, LocalObjectReference, RequestPhase,
};
use crate::Error;

/// Serialization format of exported documents
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// YAML documents
    #[default]
    Yaml,
    /// JSON documents
    Json,
}

impl ExportFormat {
    /// File extension used for archive members
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Resource export options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSpec {
    /// Whether resources are exported at all (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Document format
    #[serde(default)]
    pub format: ExportFormat,
}

/// Volume snapshot options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Explicit on/off switch; when unset, snapshots run if PVCs are selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Snapshot every PVC in scope
    #[serde(default, rename = "includeAllPVCs")]
    pub include_all_pvcs: bool,

    /// Only snapshot PVCs matching this selector
    #[serde(default, rename = "pvcSelector", skip_serializing_if = "Option::is_none")]
    pub pvc_selector: Option<LabelSelector>,

    /// VolumeSnapshotClass to request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

impl SnapshotSpec {
    /// Whether snapshots should be taken
    pub fn is_enabled(&self) -> bool {
        self.enabled
            .unwrap_or(self.include_all_pvcs || self.pvc_selector.is_some())
    }
}

/// Which resources to include in an export
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    /// Resource names, kinds, or `name.group` identifiers to keep
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Identifiers to drop; exclusion wins over inclusion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Server-side label filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Annotations that must all be present with equal values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotation_selector: BTreeMap<String, String>,
}

/// Namespace filter for cluster-scoped backups
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Namespaces to back up (default: all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<String>,

    /// Namespaces to skip
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
}

/// Status shared by Backup and ClusterBackup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
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

    /// Storage location URI of the archive (`s3://...` or `nfs://...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a Backup
///
/// The same spec is embedded in [`ClusterBackupSpec`].
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    shortname = "bk",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Location","type":"string","jsonPath":".status.artifactLocation","priority":1}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// BackupStorageLocation to write to (default location when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_ref: Option<LocalObjectReference>,

    /// Resource export options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportSpec>,

    /// Volume snapshot options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSpec>,

    /// Resource filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSelector>,

    /// Informational execution mode
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Worker deadline such as `30m` or `1h30m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Retention hint (not enforced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// Retention hint (not enforced)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_until: Option<DateTime<Utc>>,
}

impl BackupSpec {
    /// Whether resources should be exported (default: true)
    pub fn export_enabled(&self) -> bool {
        self.export
            .as_ref()
            .and_then(|e| e.enabled)
            .unwrap_or(true)
    }

    /// Configured export format
    pub fn export_format(&self) -> ExportFormat {
        self.export.as_ref().map(|e| e.format).unwrap_or_default()
    }

    /// Parsed timeout, if one is configured
    pub fn timeout_duration(&self) -> Result<Option<Duration>, Error> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// Specification for a ClusterBackup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "ClusterBackup",
    plural = "clusterbackups",
    shortname = "cbk",
    status = "BackupStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Location","type":"string","jsonPath":".status.artifactLocation","priority":1}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBackupSpec {
    /// Options shared with namespaced backups
    #[serde(flatten)]
    pub backup: BackupSpec,

    /// Namespaces in scope (default: all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    /// Whether cluster-scoped resources are exported (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,
}

impl ClusterBackupSpec {
    /// Whether cluster-scoped resources are exported
    pub fn include_cluster_resources(&self) -> bool {
        self.include_cluster_resources.unwrap_or(true)
    }
}
