//! Shared controller context

use std::sync::Arc;

use kube::Client;

use stowage_common::{Error, OperatorConfig};

use crate::dispatch::{DispatchClient, KubeDispatchClient};
use crate::remote_cluster_controller::{KubeRemoteClusterClient, RemoteClusterClient};

/// State shared by every Stowage controller
pub struct ControllerContext {
    /// Cluster access used by the request dispatcher (trait object for testability)
    pub dispatch: Arc<dyn DispatchClient>,
    /// Cluster access used by the RemoteCluster controller
    pub remotes: Arc<dyn RemoteClusterClient>,
    /// Raw Kubernetes client, `None` only in tests using mocks
    pub client: Option<Client>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl ControllerContext {
    /// Create a context backed by the API server
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            dispatch: Arc::new(KubeDispatchClient::new(client.clone(), &config)),
            remotes: Arc::new(KubeRemoteClusterClient::new(
                client.clone(),
                config.namespace.clone(),
            )),
            client: Some(client),
            config,
        }
    }

    /// Create a context around a mock dispatch client
    ///
    /// The RemoteCluster client is a mock without expectations; replace it
    /// with [`ControllerContext::with_remotes`] where it is used.
    #[cfg(test)]
    pub fn for_testing(dispatch: Arc<dyn DispatchClient>, config: OperatorConfig) -> Self {
        Self {
            dispatch,
            remotes: Arc::new(crate::remote_cluster_controller::MockRemoteClusterClient::new()),
            client: None,
            config,
        }
    }

    /// Replace the RemoteCluster client
    #[cfg(test)]
    pub fn with_remotes(mut self, remotes: Arc<dyn RemoteClusterClient>) -> Self {
        self.remotes = remotes;
        self
    }

    /// The raw client, for controllers that talk to the API server directly
    pub fn kube_client(&self) -> Result<&Client, Error> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("controller", "no kubernetes client"))
    }
}
