//! Blob storage for backup archives
//!
//! Archives are stored under a relative key
//! `<clusterID>/<kind>/<namespace|cluster>/<name>/<timestamp>/backup.tar.gz`
//! on either an S3-compatible bucket or an NFS export mounted into the
//! worker pod. `put` returns a location URI (`s3://bucket/key` or
//! `nfs://server/path`) that `get` accepts back.

use std::collections::BTreeMap;
use std::path::{Path as FsPath, PathBuf};

use async_trait::async_trait;
use kube::Client;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{Certificate, ClientOptions, ObjectStore};
use tracing::{debug, info};

use stowage_common::crd::{
    BackupStorageLocation, NfsLocationSpec, S3LocationSpec, StorageType,
};
use stowage_common::kube_utils::get_secret_data;
use stowage_common::{Error, OperatorConfig};

/// File name of every stored archive
pub const ARTIFACT_FILE_NAME: &str = "backup.tar.gz";

/// Region used when a location does not set one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Secret key holding the S3 access key id
pub const ACCESS_KEY: &str = "accessKey";
/// Secret key holding the S3 secret access key
pub const SECRET_KEY: &str = "secretKey";
/// Secret key holding an optional S3 session token
pub const SESSION_TOKEN_KEY: &str = "sessionToken";

/// Relative directory of one backup execution
pub fn artifact_dir(
    cluster_id: &str,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
    timestamp: &str,
) -> String {
    let scope = namespace.filter(|ns| !ns.is_empty()).unwrap_or("cluster");
    format!(
        "{}/{}/{}/{}/{}",
        cluster_id,
        kind.to_lowercase(),
        scope,
        name,
        timestamp
    )
}

/// Static S3 credentials read from a location's secret
#[derive(Clone, Default, PartialEq)]
pub struct S3Credentials {
    /// Access key id
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials
    pub session_token: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl S3Credentials {
    /// Pick the credential keys out of secret data
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Self {
        let read = |key: &str| {
            data.get(key)
                .map(|v| String::from_utf8_lossy(v).trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            access_key_id: read(ACCESS_KEY),
            secret_access_key: read(SECRET_KEY),
            session_token: read(SESSION_TOKEN_KEY),
        }
    }
}

fn s3_err(msg: impl Into<String>) -> Error {
    Error::storage(StorageType::S3.as_str(), msg)
}

fn nfs_err(msg: impl Into<String>) -> Error {
    Error::storage(StorageType::Nfs.as_str(), msg)
}

/// Object key for an archive under an optional bucket prefix
pub fn s3_key(prefix: Option<&str>, relative: &str) -> String {
    let prefix = prefix.unwrap_or_default().trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", relative, ARTIFACT_FILE_NAME)
    } else {
        format!("{}/{}/{}", prefix, relative, ARTIFACT_FILE_NAME)
    }
}

/// Split `s3://bucket/key` into bucket and key
pub fn parse_s3_location(location: &str) -> Result<(String, String), Error> {
    location
        .strip_prefix("s3://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .map(|(bucket, key)| (bucket.to_string(), key.to_string()))
        .ok_or_else(|| s3_err(format!("invalid s3 location {:?}", location)))
}

/// Join slash-separated path fragments, dropping empty segments
fn join_path(parts: &[&str]) -> String {
    let absolute = parts.first().is_some_and(|p| p.starts_with('/'));
    let joined = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Location URI of a file under an NFS export
pub fn nfs_location(server: &str, export_path: &str, relative: &str) -> String {
    format!("nfs://{}{}", server, join_path(&[export_path, relative]))
}

/// Path of an NFS location relative to the export root (and so to the local mount)
pub fn nfs_relative_path(location: &str, export_path: &str) -> Result<String, Error> {
    let (_server, path) = location
        .strip_prefix("nfs://")
        .and_then(|rest| rest.split_once('/'))
        .ok_or_else(|| nfs_err("invalid nfs artifact location"))?;

    let full = format!("/{}", path);
    let base = export_path.trim_end_matches('/');
    let relative = match full.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => full.as_str(),
    };
    Ok(relative.trim_start_matches('/').to_string())
}

fn build_s3(
    spec: &S3LocationSpec,
    credentials: &S3Credentials,
    bucket: &str,
) -> Result<Box<dyn ObjectStore>, Error> {
    let region = spec
        .region
        .as_deref()
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REGION);
    let endpoint = spec.endpoint.as_deref().filter(|e| !e.is_empty());

    let mut options = ClientOptions::new().with_allow_invalid_certificates(spec.insecure_skip_tls);
    if let Some(pem) = spec.ca_bundle.as_deref().filter(|p| !p.trim().is_empty()) {
        let cert = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| s3_err(format!("invalid caBundle: {}", e)))?;
        options = options.with_root_certificate(cert);
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(region)
        .with_virtual_hosted_style_request(!spec.force_path_style && endpoint.is_none())
        .with_client_options(options);
    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    if let Some(key) = &credentials.access_key_id {
        builder = builder.with_access_key_id(key);
    }
    if let Some(secret) = &credentials.secret_access_key {
        builder = builder.with_secret_access_key(secret);
    }
    if let Some(token) = &credentials.session_token {
        builder = builder.with_token(token);
    }

    Ok(Box::new(builder.build().map_err(|e| s3_err(e.to_string()))?))
}

/// Archive storage for one BackupStorageLocation
pub enum BlobStore {
    /// S3-compatible bucket
    S3 {
        /// Location settings
        spec: S3LocationSpec,
        /// Static credentials, empty to use the ambient provider chain
        credentials: S3Credentials,
    },
    /// NFS export mounted at a local path
    Nfs {
        /// NFS server, used in location URIs
        server: String,
        /// Exported path on the server
        export_path: String,
        /// Store rooted at the local mount
        store: Box<dyn ObjectStore>,
    },
}

impl BlobStore {
    /// Store writing to an S3-compatible bucket
    pub fn s3(spec: S3LocationSpec, credentials: S3Credentials) -> Self {
        Self::S3 { spec, credentials }
    }

    /// Store writing below a locally mounted NFS export
    pub fn nfs(spec: &NfsLocationSpec, mount: impl AsRef<FsPath>) -> Result<Self, Error> {
        let mount = mount.as_ref();
        let store = LocalFileSystem::new_with_prefix(mount).map_err(|e| {
            nfs_err(format!("mount path {} is not usable: {}", mount.display(), e))
        })?;
        Ok(Self::Nfs {
            server: spec.server.clone(),
            export_path: spec.path.clone(),
            store: Box::new(store),
        })
    }

    /// Backend type
    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::S3 { .. } => StorageType::S3,
            Self::Nfs { .. } => StorageType::Nfs,
        }
    }

    /// Store an archive under a relative directory and return its location URI
    pub async fn put(&self, relative_dir: &str, data: Vec<u8>) -> Result<String, Error> {
        let size = data.len();
        let location = match self {
            Self::S3 { spec, credentials } => {
                let key = s3_key(spec.prefix.as_deref(), relative_dir);
                let store = build_s3(spec, credentials, &spec.bucket)?;
                store
                    .put(&Path::from(key.as_str()), data.into())
                    .await
                    .map_err(|e| s3_err(e.to_string()))?;
                format!("s3://{}/{}", spec.bucket, key)
            }
            Self::Nfs {
                server,
                export_path,
                store,
            } => {
                let relative = format!("{}/{}", relative_dir, ARTIFACT_FILE_NAME);
                store
                    .put(&Path::from(relative.as_str()), data.into())
                    .await
                    .map_err(|e| nfs_err(e.to_string()))?;
                nfs_location(server, export_path, &relative)
            }
        };
        info!(location = %location, size, "stored archive");
        Ok(location)
    }

    /// Fetch the archive at a location URI returned by [`BlobStore::put`]
    pub async fn get(&self, location: &str) -> Result<Vec<u8>, Error> {
        debug!(location = %location, "fetching archive");
        let bytes = match self {
            Self::S3 { spec, credentials } => {
                let (bucket, key) = parse_s3_location(location)?;
                let store = build_s3(spec, credentials, &bucket)?;
                store
                    .get(&Path::from(key.as_str()))
                    .await
                    .map_err(|e| s3_err(e.to_string()))?
                    .bytes()
                    .await
                    .map_err(|e| s3_err(e.to_string()))?
            }
            Self::Nfs {
                export_path, store, ..
            } => {
                let relative = nfs_relative_path(location, export_path)?;
                store
                    .get(&Path::from(relative.as_str()))
                    .await
                    .map_err(|e| nfs_err(e.to_string()))?
                    .bytes()
                    .await
                    .map_err(|e| nfs_err(e.to_string()))?
            }
        };
        Ok(bytes.to_vec())
    }
}

/// Opens the blob store behind a BackupStorageLocation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStoreProvider: Send + Sync {
    /// Open the store for a resolved location
    async fn open(&self, location: &BackupStorageLocation) -> Result<BlobStore, Error>;
}

/// BlobStoreProvider reading credentials from cluster secrets
pub struct KubeBlobStoreProvider {
    client: Client,
    operator_namespace: String,
    nfs_mount_path: PathBuf,
}

impl KubeBlobStoreProvider {
    /// Create a provider using the operator's namespace and mount path
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            client,
            operator_namespace: config.namespace.clone(),
            nfs_mount_path: config.nfs_mount_path.clone(),
        }
    }

    async fn s3_credentials(&self, spec: &S3LocationSpec) -> Result<S3Credentials, Error> {
        let secret_ref = &spec.secret_ref;
        if secret_ref.name.is_empty() {
            return Ok(S3Credentials::default());
        }
        let namespace = secret_ref.namespace_or(&self.operator_namespace);
        let data = get_secret_data(&self.client, &secret_ref.name, namespace)
            .await
            .map_err(|e| s3_err(format!("unable to read credentials secret: {}", e)))?;
        Ok(S3Credentials::from_secret_data(&data))
    }
}

#[async_trait]
impl BlobStoreProvider for KubeBlobStoreProvider {
    async fn open(&self, location: &BackupStorageLocation) -> Result<BlobStore, Error> {
        let spec = &location.spec;
        let backend = spec.type_.as_str();
        spec.validate()
            .map_err(|msg| Error::storage(backend, msg))?;

        match (spec.type_, &spec.s3, &spec.nfs) {
            (StorageType::S3, Some(s3), _) => {
                let credentials = self.s3_credentials(s3).await?;
                Ok(BlobStore::s3(s3.clone(), credentials))
            }
            (StorageType::Nfs, _, Some(nfs)) => BlobStore::nfs(nfs, &self.nfs_mount_path),
            _ => Err(Error::storage(backend, "storage configuration missing")),
        }
    }
}
