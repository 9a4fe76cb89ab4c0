//! Loading requests and writing their terminal status
//!
//! The worker handles four CRD kinds through two normalized shapes,
//! [`BackupRequest`] and [`RestoreRequest`].

use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, ResourceExt};

use stowage_common::crd::{
    Backup, BackupSpec, BackupStatus, ClusterBackup, ClusterRestore, Restore, RestoreSpec,
    RestoreStatus, RequestKind,
};
use stowage_common::kube_utils::{patch_cluster_resource_status, patch_resource_status};
use stowage_common::{Error, FIELD_MANAGER};

use crate::export::BackupScope;

/// Identity of a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRef {
    /// Request kind
    pub kind: RequestKind,
    /// Object name
    pub name: String,
    /// Object namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl RequestRef {
    /// Build a reference, dropping the namespace for cluster-scoped kinds
    pub fn new(kind: RequestKind, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace
                .filter(|ns| !ns.is_empty())
                .filter(|_| kind.is_namespaced()),
        }
    }

    fn namespace_for(&self, action: &str) -> Result<&str, Error> {
        self.namespace.as_deref().ok_or_else(|| {
            Error::validation_for_field(
                &self.name,
                "metadata.namespace",
                format!("namespace is required to {} a {}", action, self.kind),
            )
        })
    }
}

impl std::fmt::Display for RequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A Backup or ClusterBackup
#[derive(Clone, Debug)]
pub struct BackupRequest {
    /// Identity
    pub target: RequestRef,
    /// Shared spec
    pub spec: BackupSpec,
    /// What the backup covers
    pub scope: BackupScope,
    /// Current status
    pub status: BackupStatus,
}

impl From<Backup> for BackupRequest {
    fn from(backup: Backup) -> Self {
        let namespace = backup.namespace().unwrap_or_default();
        Self {
            target: RequestRef::new(RequestKind::Backup, backup.name_any(), Some(namespace.clone())),
            scope: BackupScope::Namespace(namespace),
            spec: backup.spec,
            status: backup.status.unwrap_or_default(),
        }
    }
}

impl From<ClusterBackup> for BackupRequest {
    fn from(backup: ClusterBackup) -> Self {
        let include_cluster_resources = backup.spec.include_cluster_resources();
        Self {
            target: RequestRef::new(RequestKind::ClusterBackup, backup.name_any(), None),
            scope: BackupScope::Cluster {
                namespaces: backup.spec.namespaces.clone().unwrap_or_default(),
                include_cluster_resources,
            },
            spec: backup.spec.backup,
            status: backup.status.unwrap_or_default(),
        }
    }
}

/// A Restore or ClusterRestore
#[derive(Clone, Debug)]
pub struct RestoreRequest {
    /// Identity
    pub target: RequestRef,
    /// Shared spec
    pub spec: RestoreSpec,
    /// Current status
    pub status: RestoreStatus,
}

impl From<Restore> for RestoreRequest {
    fn from(restore: Restore) -> Self {
        Self {
            target: RequestRef::new(RequestKind::Restore, restore.name_any(), restore.namespace()),
            spec: restore.spec,
            status: restore.status.unwrap_or_default(),
        }
    }
}

impl From<ClusterRestore> for RestoreRequest {
    fn from(restore: ClusterRestore) -> Self {
        Self {
            target: RequestRef::new(RequestKind::ClusterRestore, restore.name_any(), None),
            spec: restore.spec.restore,
            status: restore.status.unwrap_or_default(),
        }
    }
}

/// Request access used by workers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Load a Backup or ClusterBackup, `None` if it no longer exists
    async fn get_backup(&self, target: &RequestRef) -> Result<Option<BackupRequest>, Error>;

    /// Load a Restore or ClusterRestore, `None` if it no longer exists
    async fn get_restore(&self, target: &RequestRef) -> Result<Option<RestoreRequest>, Error>;

    /// Write a backup's status
    async fn patch_backup_status(
        &self,
        target: &RequestRef,
        status: &BackupStatus,
    ) -> Result<(), Error>;

    /// Write a restore's status
    async fn patch_restore_status(
        &self,
        target: &RequestRef,
        status: &RestoreStatus,
    ) -> Result<(), Error>;
}

/// RequestStore backed by the API server
pub struct KubeRequestStore {
    client: Client,
}

impl KubeRequestStore {
    /// Create a store for the local cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestStore for KubeRequestStore {
    async fn get_backup(&self, target: &RequestRef) -> Result<Option<BackupRequest>, Error> {
        match target.kind {
            RequestKind::Backup => {
                let api: Api<Backup> =
                    Api::namespaced(self.client.clone(), target.namespace_for("load")?);
                Ok(api.get_opt(&target.name).await?.map(BackupRequest::from))
            }
            RequestKind::ClusterBackup => {
                let api: Api<ClusterBackup> = Api::all(self.client.clone());
                Ok(api.get_opt(&target.name).await?.map(BackupRequest::from))
            }
            other => Err(Error::unsupported("backup kind", other.as_str())),
        }
    }

    async fn get_restore(&self, target: &RequestRef) -> Result<Option<RestoreRequest>, Error> {
        match target.kind {
            RequestKind::Restore => {
                let api: Api<Restore> =
                    Api::namespaced(self.client.clone(), target.namespace_for("load")?);
                Ok(api.get_opt(&target.name).await?.map(RestoreRequest::from))
            }
            RequestKind::ClusterRestore => {
                let api: Api<ClusterRestore> = Api::all(self.client.clone());
                Ok(api.get_opt(&target.name).await?.map(RestoreRequest::from))
            }
            other => Err(Error::unsupported("restore kind", other.as_str())),
        }
    }

    async fn patch_backup_status(
        &self,
        target: &RequestRef,
        status: &BackupStatus,
    ) -> Result<(), Error> {
        match target.kind {
            RequestKind::Backup => {
                patch_resource_status::<Backup>(
                    &self.client,
                    &target.name,
                    target.namespace_for("update")?,
                    status,
                    FIELD_MANAGER,
                )
                .await?
            }
            RequestKind::ClusterBackup => {
                patch_cluster_resource_status::<ClusterBackup>(
                    &self.client,
                    &target.name,
                    status,
                    FIELD_MANAGER,
                )
                .await?
            }
            other => return Err(Error::unsupported("backup kind", other.as_str())),
        }
        Ok(())
    }

    async fn patch_restore_status(
        &self,
        target: &RequestRef,
        status: &RestoreStatus,
    ) -> Result<(), Error> {
        match target.kind {
            RequestKind::Restore => {
                patch_resource_status::<Restore>(
                    &self.client,
                    &target.name,
                    target.namespace_for("update")?,
                    status,
                    FIELD_MANAGER,
                )
                .await?
            }
            RequestKind::ClusterRestore => {
                patch_cluster_resource_status::<ClusterRestore>(
                    &self.client,
                    &target.name,
                    status,
                    FIELD_MANAGER,
                )
                .await?
            }
            other => return Err(Error::unsupported("restore kind", other.as_str())),
        }
        Ok(())
    }
}
