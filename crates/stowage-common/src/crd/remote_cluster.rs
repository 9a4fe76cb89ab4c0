//! RemoteCluster Custom Resource Definition
//!
//! A RemoteCluster describes a peer cluster that restores can target.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SecretReference};

/// How the operator authenticates against the peer
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RemoteAuthMethod {
    /// Bearer token (`token` key) plus optional `ca.crt`
    ServiceAccountToken,
    /// Complete kubeconfig (`kubeconfig` key)
    Kubeconfig,
}

impl std::fmt::Display for RemoteAuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccountToken => write!(f, "ServiceAccountToken"),
            Self::Kubeconfig => write!(f, "Kubeconfig"),
        }
    }
}

/// Credentials for a RemoteCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterAuth {
    /// Authentication method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<RemoteAuthMethod>,

    /// Secret holding the credential
    #[serde(default)]
    pub secret_ref: SecretReference,
}

/// Status of a RemoteCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When connectivity was last probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Result of the last probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a RemoteCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "stowage.dev",
    version = "v1alpha1",
    kind = "RemoteCluster",
    plural = "remoteclusters",
    shortname = "rc",
    status = "RemoteClusterStatus",
    printcolumn = r#"{"name":"API Server","type":"string","jsonPath":".spec.apiServer"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterSpec {
    /// Identity of the peer cluster
    #[serde(default, rename = "clusterID", skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// API server URL
    pub api_server: String,

    /// Credentials
    pub auth: RemoteClusterAuth,

    /// PEM-encoded CA bundle; overrides `ca.crt` from the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    /// Skip TLS certificate verification
    #[serde(default, rename = "insecureSkipTLS")]
    pub insecure_skip_tls: bool,
}
