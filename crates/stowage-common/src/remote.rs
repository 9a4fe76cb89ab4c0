//! Remote cluster authentication
//!
//! A [`RemoteCluster`] points at a credential secret. The secret is turned
//! into a [`RemoteCredential`] once, and that credential into a kube
//! [`Config`] for every client built against the peer.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tracing::{debug, instrument};

use crate::crd::{RemoteAuthMethod, RemoteCluster, RemoteClusterSpec};
use crate::kube_utils::{client_from_config, get_secret_data};
use crate::Error;

/// Secret key holding a complete kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";
/// Secret key holding a bearer token
pub const TOKEN_KEY: &str = "token";
/// Secret key holding the peer's CA certificate
pub const CA_KEY: &str = "ca.crt";

/// How long a connectivity probe may take
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Message recorded when a probe succeeds
pub const REACHABLE_MESSAGE: &str = "remote cluster reachable";

const CONTEXT_NAME: &str = "remote";

/// Credential for a peer cluster
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteCredential {
    /// Self-contained kubeconfig document
    Kubeconfig(String),
    /// Bearer token against an explicit endpoint
    Token {
        /// API server URL
        api_server: String,
        /// Bearer token
        token: String,
        /// PEM CA bundle, if any
        ca: Option<Vec<u8>>,
        /// Skip TLS verification
        insecure: bool,
    },
}

impl RemoteCredential {
    /// Derive the credential from a RemoteCluster spec and its secret data
    ///
    /// An unset method means token authentication. A `caBundle` on the spec
    /// overrides `ca.crt` from the secret.
    pub fn from_secret(
        cluster: &str,
        spec: &RemoteClusterSpec,
        data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, Error> {
        match spec.auth.method.unwrap_or(RemoteAuthMethod::ServiceAccountToken) {
            RemoteAuthMethod::Kubeconfig => {
                let raw = data.get(KUBECONFIG_KEY).ok_or_else(|| {
                    Error::remote_cluster(cluster, "kubeconfig key not found in secret")
                })?;
                let text = String::from_utf8(raw.clone()).map_err(|e| {
                    Error::remote_cluster(cluster, format!("kubeconfig is not UTF-8: {}", e))
                })?;
                Ok(Self::Kubeconfig(text))
            }
            RemoteAuthMethod::ServiceAccountToken => {
                let token = data.get(TOKEN_KEY).ok_or_else(|| {
                    Error::remote_cluster(cluster, "token key not found in secret")
                })?;
                let ca = spec
                    .ca_bundle
                    .as_ref()
                    .filter(|pem| !pem.is_empty())
                    .map(|pem| pem.as_bytes().to_vec())
                    .or_else(|| data.get(CA_KEY).cloned());
                Ok(Self::Token {
                    api_server: spec.api_server.clone(),
                    token: String::from_utf8_lossy(token).trim().to_string(),
                    ca,
                    insecure: spec.insecure_skip_tls,
                })
            }
        }
    }

    /// Express the credential as a kubeconfig
    pub fn to_kubeconfig(&self) -> Result<Kubeconfig, Error> {
        match self {
            Self::Kubeconfig(raw) => Kubeconfig::from_yaml(raw)
                .map_err(|e| Error::serialization(format!("invalid kubeconfig: {}", e))),
            Self::Token {
                api_server,
                token,
                ca,
                insecure,
            } => {
                let mut cluster = serde_json::json!({ "server": api_server });
                if let Some(ca) = ca {
                    cluster["certificate-authority-data"] = serde_json::Value::String(
                        base64::engine::general_purpose::STANDARD.encode(ca),
                    );
                }
                if *insecure {
                    cluster["insecure-skip-tls-verify"] = serde_json::Value::Bool(true);
                }
                let doc = serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Config",
                    "clusters": [{ "name": CONTEXT_NAME, "cluster": cluster }],
                    "users": [{ "name": CONTEXT_NAME, "user": { "token": token } }],
                    "contexts": [{
                        "name": CONTEXT_NAME,
                        "context": { "cluster": CONTEXT_NAME, "user": CONTEXT_NAME }
                    }],
                    "current-context": CONTEXT_NAME,
                });
                serde_json::from_value(doc)
                    .map_err(|e| Error::serialization(format!("invalid kubeconfig: {}", e)))
            }
        }
    }

    /// Build a kube client configuration from the credential
    pub async fn to_config(&self) -> Result<Config, Error> {
        Config::from_custom_kubeconfig(self.to_kubeconfig()?, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::internal_with_context("remote_config", e.to_string()))
    }
}

/// Load the credential for a RemoteCluster
///
/// The secret namespace defaults to `default_namespace`.
pub async fn load_credential(
    client: &Client,
    remote: &RemoteCluster,
    default_namespace: &str,
) -> Result<RemoteCredential, Error> {
    let name = remote.name_any();
    let secret_ref = &remote.spec.auth.secret_ref;
    let namespace = secret_ref.namespace_or(default_namespace);
    let data = get_secret_data(client, &secret_ref.name, namespace)
        .await
        .map_err(|e| {
            Error::remote_cluster(&name, format!("unable to read auth secret: {}", e))
        })?;
    RemoteCredential::from_secret(&name, &remote.spec, &data)
}

/// Build a client for the RemoteCluster with the given name
#[instrument(skip(client))]
pub async fn remote_client(
    client: &Client,
    name: &str,
    default_namespace: &str,
) -> Result<Client, Error> {
    let remotes: Api<RemoteCluster> = Api::all(client.clone());
    let remote = remotes.get(name).await?;
    let credential = load_credential(client, &remote, default_namespace).await?;
    debug!(api_server = %remote.spec.api_server, "built remote cluster credential");
    client_from_config(credential.to_config().await?)
}

/// Check that the peer answers a minimal list call
pub async fn probe(client: &Client) -> Result<(), String> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match tokio::time::timeout(PROBE_TIMEOUT, namespaces.list(&ListParams::default().limit(1)))
        .await
    {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("remote cluster not reachable: {}", e)),
        Err(_) => Err(format!(
            "remote cluster not reachable: timed out after {}s",
            PROBE_TIMEOUT.as_secs()
        )),
    }
}
