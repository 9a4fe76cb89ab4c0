//! Untyped access to cluster objects
//!
//! The export, snapshot and apply engines never see typed Kubernetes
//! structs. They go through [`ResourceStore`], which speaks
//! `serde_json::Value` and discovery-resolved [`ApiResource`]s.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams, TypeMeta};
use kube::discovery::{self, verbs, ApiCapabilities, ApiGroup, ApiResource, Scope};
use kube::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use stowage_common::kube_utils::{build_api_resource, parse_api_version};
use stowage_common::Error;

/// A resource type as advertised by the API server
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredType {
    /// Group, version, kind and plural
    pub resource: ApiResource,
    /// Whether objects live in a namespace
    pub namespaced: bool,
    /// Whether the type supports `list`
    pub listable: bool,
}

impl DiscoveredType {
    /// A type that is known without asking discovery
    pub fn fixed(api_version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            resource: build_api_resource(api_version, kind, plural),
            namespaced,
            listable: true,
        }
    }
}

/// `v1/Namespace`
pub fn namespace_type() -> DiscoveredType {
    DiscoveredType::fixed("v1", "Namespace", "namespaces", false)
}

/// `v1/PersistentVolumeClaim`
pub fn pvc_type() -> DiscoveredType {
    DiscoveredType::fixed("v1", "PersistentVolumeClaim", "persistentvolumeclaims", true)
}

/// `snapshot.storage.k8s.io/v1/VolumeSnapshot`
pub fn volume_snapshot_type() -> DiscoveredType {
    DiscoveredType::fixed(
        "snapshot.storage.k8s.io/v1",
        "VolumeSnapshot",
        "volumesnapshots",
        true,
    )
}

/// Generic object CRUD against one cluster
///
/// `namespace` is ignored for cluster-scoped types.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Every top-level resource type the server advertises
    async fn discover(&self) -> Result<Vec<DiscoveredType>, Error>;

    /// Map an apiVersion/kind pair to a served type, `None` if the server has no such type
    async fn resolve(&self, api_version: &str, kind: &str)
        -> Result<Option<DiscoveredType>, Error>;

    /// List objects, optionally in one namespace and filtered by a label selector query
    async fn list(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<Value>, Error>;

    /// Get one object, `None` if it does not exist
    async fn get(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
    ) -> Result<Option<Value>, Error>;

    /// Create an object
    async fn create(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        doc: &Value,
    ) -> Result<Value, Error>;

    /// Replace an object; `doc` must carry the current resourceVersion
    async fn replace(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
        doc: &Value,
    ) -> Result<Value, Error>;

    /// JSON merge-patch an object
    async fn merge_patch(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, Error>;

    /// Names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>, Error>;
}

/// ResourceStore backed by a kube client
///
/// Discovery runs once per store and is cached for its lifetime. API groups
/// that fail to answer (an unavailable aggregated API, typically) are left
/// out of the cache instead of failing discovery as a whole.
pub struct KubeResourceStore {
    client: Client,
    groups: OnceCell<Vec<ApiGroup>>,
}

impl KubeResourceStore {
    /// Create a store for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            groups: OnceCell::new(),
        }
    }

    async fn groups(&self) -> Result<&[ApiGroup], Error> {
        let groups = self
            .groups
            .get_or_try_init(|| async {
                debug!("running API discovery");
                let names = self.client.list_api_groups().await?;
                let mut groups = vec![discovery::group(&self.client, ApiGroup::CORE_GROUP).await?];
                for name in names.groups.into_iter().map(|g| g.name) {
                    match discovery::group(&self.client, &name).await {
                        Ok(group) => groups.push(group),
                        Err(error) => warn!(group = %name, %error, "skipping unavailable API group"),
                    }
                }
                Ok::<_, Error>(groups)
            })
            .await?;
        Ok(groups.as_slice())
    }

    fn api(&self, ty: &DiscoveredType, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if ty.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &ty.resource)
            }
            _ => Api::all_with(self.client.clone(), &ty.resource),
        }
    }
}

fn discovered(resource: ApiResource, caps: &ApiCapabilities) -> DiscoveredType {
    DiscoveredType {
        namespaced: caps.scope == Scope::Namespaced,
        listable: caps.supports_operation(verbs::LIST),
        resource,
    }
}

fn to_dynamic(doc: &Value) -> Result<DynamicObject, Error> {
    serde_json::from_value(doc.clone()).map_err(|e| {
        Error::serialization_for_kind(crate::document::kind_of(doc), e.to_string())
    })
}

fn to_value(ty: &DiscoveredType, mut obj: DynamicObject) -> Result<Value, Error> {
    obj.types = Some(TypeMeta {
        api_version: ty.resource.api_version.clone(),
        kind: ty.resource.kind.clone(),
    });
    serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(ty.resource.kind.clone(), e.to_string()))
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn discover(&self) -> Result<Vec<DiscoveredType>, Error> {
        let groups = self.groups().await?;
        Ok(groups
            .iter()
            .flat_map(|group| group.recommended_resources())
            .map(|(ar, caps)| discovered(ar, &caps))
            .collect())
    }

    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<Option<DiscoveredType>, Error> {
        let (group, version) = parse_api_version(api_version);
        let groups = self.groups().await?;
        let Some(api_group) = groups.iter().find(|g| g.name() == group) else {
            return Ok(None);
        };

        // Only the exact version: the document body carries its own apiVersion
        Ok(api_group
            .versioned_resources(&version)
            .into_iter()
            .find(|(ar, _)| ar.kind == kind)
            .map(|(ar, caps)| discovered(ar, &caps)))
    }

    async fn list(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<Value>, Error> {
        let mut params = ListParams::default();
        if let Some(selector) = &label_selector {
            params = params.labels(selector);
        }
        let list = self.api(ty, namespace.as_deref()).list(&params).await?;
        list.items
            .into_iter()
            .map(|obj| to_value(ty, obj))
            .collect()
    }

    async fn get(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
    ) -> Result<Option<Value>, Error> {
        match self.api(ty, namespace.as_deref()).get_opt(name).await? {
            Some(obj) => Ok(Some(to_value(ty, obj)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        doc: &Value,
    ) -> Result<Value, Error> {
        let obj = to_dynamic(doc)?;
        let created = self
            .api(ty, namespace.as_deref())
            .create(&PostParams::default(), &obj)
            .await?;
        to_value(ty, created)
    }

    async fn replace(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
        doc: &Value,
    ) -> Result<Value, Error> {
        let obj = to_dynamic(doc)?;
        let replaced = self
            .api(ty, namespace.as_deref())
            .replace(name, &PostParams::default(), &obj)
            .await?;
        to_value(ty, replaced)
    }

    async fn merge_patch(
        &self,
        ty: &DiscoveredType,
        namespace: Option<String>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, Error> {
        let patched = self
            .api(ty, namespace.as_deref())
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        to_value(ty, patched)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}
