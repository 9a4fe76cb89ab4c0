//! Test doubles shared by the pipeline tests

use async_trait::async_trait;
use kube::core::ObjectMeta;

use stowage_common::crd::{
    BackupStorageLocation, BackupStorageLocationSpec, NfsLocationSpec, StorageType,
};
use stowage_common::location::StorageLocationStore;
use stowage_common::Error;

/// NFS location exporting `nfs.backup.local:/exports/stowage`
pub fn nfs_location_named(name: &str, default: bool) -> BackupStorageLocation {
    BackupStorageLocation {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: BackupStorageLocationSpec {
            type_: StorageType::Nfs,
            nfs: Some(NfsLocationSpec {
                server: "nfs.backup.local".to_string(),
                path: "/exports/stowage".to_string(),
                ..Default::default()
            }),
            default,
            ..Default::default()
        },
        status: None,
    }
}

/// In-memory BackupStorageLocation registry
pub struct FakeLocations {
    locations: Vec<BackupStorageLocation>,
}

impl FakeLocations {
    /// Registry holding `locations`
    pub fn new(locations: Vec<BackupStorageLocation>) -> Self {
        Self { locations }
    }
}

#[async_trait]
impl StorageLocationStore for FakeLocations {
    async fn get_location(&self, name: &str) -> Result<Option<BackupStorageLocation>, Error> {
        Ok(self
            .locations
            .iter()
            .find(|l| l.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_locations(&self) -> Result<Vec<BackupStorageLocation>, Error> {
        Ok(self.locations.clone())
    }
}
