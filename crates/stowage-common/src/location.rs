//! BackupStorageLocation resolution
//!
//! A request either names its location or relies on the default: the
//! location marked `default`, else the only configured location.

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::Client;

use crate::crd::BackupStorageLocation;
use crate::Error;

/// Read access to BackupStorageLocations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageLocationStore: Send + Sync {
    /// Get a location by name, `None` if it does not exist
    async fn get_location(&self, name: &str) -> Result<Option<BackupStorageLocation>, Error>;

    /// List every configured location
    async fn list_locations(&self) -> Result<Vec<BackupStorageLocation>, Error>;
}

/// StorageLocationStore backed by the API server
pub struct KubeStorageLocationStore {
    api: Api<BackupStorageLocation>,
}

impl KubeStorageLocationStore {
    /// Create a store reading cluster-scoped locations
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl StorageLocationStore for KubeStorageLocationStore {
    async fn get_location(&self, name: &str) -> Result<Option<BackupStorageLocation>, Error> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list_locations(&self) -> Result<Vec<BackupStorageLocation>, Error> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }
}

/// Resolve the location a request writes to or reads from
///
/// Resolution failures are [`Error::StorageResolution`]; API errors pass through.
pub async fn resolve_storage_location(
    store: &dyn StorageLocationStore,
    name: Option<&str>,
) -> Result<BackupStorageLocation, Error> {
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        return store.get_location(name).await?.ok_or_else(|| {
            Error::storage_resolution(format!("BackupStorageLocation {:?} not found", name))
        });
    }

    select_default(store.list_locations().await?)
}

fn select_default(
    mut locations: Vec<BackupStorageLocation>,
) -> Result<BackupStorageLocation, Error> {
    if locations.is_empty() {
        return Err(Error::storage_resolution("no BackupStorageLocation found"));
    }
    if let Some(idx) = locations.iter().position(|l| l.spec.default) {
        return Ok(locations.swap_remove(idx));
    }
    if locations.len() == 1 {
        return Ok(locations.swap_remove(0));
    }
    Err(Error::storage_resolution(
        "no default BackupStorageLocation set",
    ))
}
