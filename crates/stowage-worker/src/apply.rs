//! Restore apply engine
//!
//! Re-creates archived documents on a target cluster. Documents are applied
//! in dependency order, namespaced documents are moved to their target
//! namespace (created on demand), and objects that already exist are
//! handled according to the restore's [`OverwritePolicy`].

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stowage_common::crd::OverwritePolicy;
use stowage_common::Error;

use crate::document::{
    api_version_of, is_denied_kind, kind_of, name_of, namespace_of, resource_version_of,
    sanitize, set_namespace, set_resource_version, sort_by_priority,
};
use crate::store::{namespace_type, DiscoveredType, ResourceStore};

/// Namespace used for namespaced documents that carry none
pub const FALLBACK_NAMESPACE: &str = "default";

/// How documents are placed on the target
#[derive(Clone, Debug, Default)]
pub struct ApplyOptions {
    /// Original namespace to target namespace
    pub namespace_mapping: BTreeMap<String, String>,
    /// Single namespace every namespaced document goes to (namespaced restores)
    pub default_namespace: Option<String>,
    /// Conflict handling
    pub overwrite: OverwritePolicy,
}

impl ApplyOptions {
    /// Target namespace for a namespaced document
    ///
    /// The default override wins, then the mapping, then the original namespace.
    pub fn target_namespace(&self, original: Option<&str>) -> String {
        if let Some(ns) = self.default_namespace.as_deref().filter(|ns| !ns.is_empty()) {
            return ns.to_string();
        }
        let original = original.unwrap_or(FALLBACK_NAMESPACE);
        self.namespace_mapping
            .get(original)
            .filter(|ns| !ns.is_empty())
            .cloned()
            .unwrap_or_else(|| original.to_string())
    }
}

/// What happened to each document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Newly created objects
    pub created: usize,
    /// Existing objects replaced
    pub replaced: usize,
    /// Existing objects merge-patched
    pub merged: usize,
    /// Existing objects left untouched
    pub unchanged: usize,
    /// Documents whose type the target does not serve
    pub unmapped: usize,
    /// Documents of a denied kind
    pub denied: usize,
}

impl ApplySummary {
    /// Number of documents written to the target
    pub fn applied(&self) -> usize {
        self.created + self.replaced + self.merged
    }
}

enum Outcome {
    Created,
    Replaced,
    Merged,
    Unchanged,
}

async fn ensure_namespace(
    store: &dyn ResourceStore,
    namespace: &str,
    known: &mut BTreeSet<String>,
) -> Result<(), Error> {
    if known.contains(namespace) {
        return Ok(());
    }
    let ty = namespace_type();
    if store.get(&ty, None, namespace).await?.is_none() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        });
        match store.create(&ty, None, &doc).await {
            Ok(_) => info!(namespace = %namespace, "created namespace"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
    }
    known.insert(namespace.to_string());
    Ok(())
}

async fn upsert(
    store: &dyn ResourceStore,
    ty: &DiscoveredType,
    namespace: Option<String>,
    doc: &mut Value,
    policy: OverwritePolicy,
) -> Result<Outcome, Error> {
    set_resource_version(doc, None);
    let err = match store.create(ty, namespace.clone(), doc).await {
        Ok(_) => return Ok(Outcome::Created),
        Err(e) if e.is_already_exists() => e,
        Err(e) => return Err(e),
    };

    let name = name_of(doc).to_string();
    match policy {
        OverwritePolicy::Skip => Ok(Outcome::Unchanged),
        OverwritePolicy::Merge => {
            store.merge_patch(ty, namespace, &name, doc).await?;
            Ok(Outcome::Merged)
        }
        OverwritePolicy::Replace => {
            let existing = store.get(ty, namespace.clone(), &name).await?;
            let Some(existing) = existing else {
                // deleted between create and get
                return Err(err);
            };
            set_resource_version(doc, resource_version_of(&existing));
            store.replace(ty, namespace, &name, doc).await?;
            Ok(Outcome::Replaced)
        }
    }
}

/// Apply documents to a target cluster
///
/// Fails fast on the first error other than "already exists". Every step is
/// an upsert, so re-running after a failure converges.
pub async fn apply_documents(
    store: &dyn ResourceStore,
    mut docs: Vec<Value>,
    options: &ApplyOptions,
) -> Result<ApplySummary, Error> {
    sort_by_priority(&mut docs);

    let mut summary = ApplySummary::default();
    let mut namespaces = BTreeSet::new();

    for mut doc in docs {
        let kind = kind_of(&doc).to_string();
        if is_denied_kind(&kind) {
            summary.denied += 1;
            continue;
        }
        sanitize(&mut doc);

        let Some(ty) = store.resolve(api_version_of(&doc), &kind).await? else {
            warn!(
                api_version = %api_version_of(&doc),
                kind = %kind,
                name = %name_of(&doc),
                "skipping document of a type the target does not serve"
            );
            summary.unmapped += 1;
            continue;
        };

        let namespace = if ty.namespaced {
            let target = options.target_namespace(namespace_of(&doc));
            ensure_namespace(store, &target, &mut namespaces).await?;
            set_namespace(&mut doc, &target);
            Some(target)
        } else {
            None
        };

        let outcome = upsert(store, &ty, namespace.clone(), &mut doc, options.overwrite).await?;
        debug!(kind = %kind, name = %name_of(&doc), namespace = ?namespace, "applied document");
        match outcome {
            Outcome::Created => summary.created += 1,
            Outcome::Replaced => summary.replaced += 1,
            Outcome::Merged => summary.merged += 1,
            Outcome::Unchanged => summary.unchanged += 1,
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{already_exists, cluster_scoped, forbidden, namespaced};
    use crate::store::MockResourceStore;
    use std::sync::{Arc, Mutex};

    fn configmap(name: &str, ns: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": ns, "resourceVersion": "100"},
            "data": {"k": "v"}
        })
    }

    fn resolving(store: &mut MockResourceStore) {
        store.expect_resolve().returning(|api_version, kind| {
            Ok(match kind {
                "Namespace" => Some(cluster_scoped(api_version, kind, "namespaces")),
                "ConfigMap" => Some(namespaced(api_version, kind, "configmaps")),
                "Deployment" => Some(namespaced(api_version, kind, "deployments")),
                _ => None,
            })
        });
    }

    fn namespaces_exist(store: &mut MockResourceStore) {
        store
            .expect_get()
            .withf(|ty, _, _| ty.resource.kind == "Namespace")
            .returning(|_, _, name| Ok(Some(json!({"metadata": {"name": name}}))));
    }

    type Calls = Arc<Mutex<Vec<String>>>;

    fn record(calls: &Calls, entry: String) {
        calls.lock().unwrap().push(entry);
    }

    // ==========================================================================
    // Story Tests: Replaying an archive onto a cluster
    // ==========================================================================

    /// Story: Dependencies are created before dependents, whatever the archive order
    #[tokio::test]
    async fn story_documents_apply_in_priority_order() {
        let calls: Calls = Arc::default();
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        namespaces_exist(&mut store);
        let c = calls.clone();
        store.expect_create().returning(move |_, _, doc| {
            record(&c, format!("{}/{}", kind_of(doc), name_of(doc)));
            Ok(doc.clone())
        });

        let docs = vec![
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "api", "namespace": "apps"}}),
            configmap("cfg", "apps"),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "apps"}}),
        ];
        let summary = apply_documents(&store, docs, &ApplyOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.created, 3);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["Namespace/apps", "ConfigMap/cfg", "Deployment/api"]
        );
    }

    /// Story: Applying twice converges: create first, replace with the live version second
    #[tokio::test]
    async fn story_second_apply_replaces_with_fetched_version() {
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        namespaces_exist(&mut store);
        store
            .expect_create()
            .withf(|_, _, doc| doc["metadata"].get("resourceVersion").is_none())
            .returning(|_, _, _| Err(already_exists()));
        store
            .expect_get()
            .withf(|ty, ns, name| {
                ty.resource.kind == "ConfigMap" && ns.as_deref() == Some("apps") && name == "cfg"
            })
            .returning(|_, _, _| Ok(Some(json!({"metadata": {"name": "cfg", "resourceVersion": "812"}}))));
        store
            .expect_replace()
            .times(1)
            .withf(|_, ns, name, doc| {
                ns.as_deref() == Some("apps")
                    && name == "cfg"
                    && doc["metadata"]["resourceVersion"] == "812"
                    && doc["data"]["k"] == "v"
            })
            .returning(|_, _, _, doc| Ok(doc.clone()));

        let summary = apply_documents(&store, vec![configmap("cfg", "apps")], &ApplyOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.applied(), 1);
    }

    /// Story: A namespaced restore pulls everything into its own namespace
    #[tokio::test]
    async fn story_default_namespace_overrides_mapping() {
        let calls: Calls = Arc::default();
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        let c = calls.clone();
        store
            .expect_get()
            .withf(|ty, _, _| ty.resource.kind == "Namespace")
            .returning(|_, _, _| Ok(None));
        store.expect_create().returning(move |ty, ns, doc| {
            record(&c, format!("{}:{:?}:{:?}", ty.resource.kind, ns, namespace_of(doc)));
            Ok(doc.clone())
        });

        let options = ApplyOptions {
            namespace_mapping: BTreeMap::from([("apps".to_string(), "apps-dr".to_string())]),
            default_namespace: Some("restored".to_string()),
            overwrite: OverwritePolicy::Replace,
        };
        apply_documents(
            &store,
            vec![configmap("a", "apps"), configmap("b", "other")],
            &options,
        )
        .await
        .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "Namespace:None:None",
                "ConfigMap:Some(\"restored\"):Some(\"restored\")",
                "ConfigMap:Some(\"restored\"):Some(\"restored\")",
            ]
        );
    }

    /// Story: A ClusterRestore remaps namespaces through the mapping table
    #[test]
    fn story_mapping_then_original() {
        let options = ApplyOptions {
            namespace_mapping: BTreeMap::from([("apps".to_string(), "apps-dr".to_string())]),
            ..Default::default()
        };
        assert_eq!(options.target_namespace(Some("apps")), "apps-dr");
        assert_eq!(options.target_namespace(Some("db")), "db");
        assert_eq!(options.target_namespace(None), "default");
    }

    /// Story: Unknown and denied types are skipped without failing the restore
    #[tokio::test]
    async fn story_unmapped_and_denied_documents_are_skipped() {
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        store.expect_create().never();

        let docs = vec![
            json!({"apiVersion": "widgets.example.com/v1", "kind": "Widget", "metadata": {"name": "w"}}),
            json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p", "namespace": "apps"}}),
            json!({"apiVersion": "v1", "kind": "Event", "metadata": {"name": "e", "namespace": "apps"}}),
        ];
        let summary = apply_documents(&store, docs, &ApplyOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.unmapped, 1);
        assert_eq!(summary.denied, 2);
        assert_eq!(summary.applied(), 0);
    }

    /// Story: Merge and Skip policies handle existing objects without a replace
    #[tokio::test]
    async fn story_merge_and_skip_policies() {
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        namespaces_exist(&mut store);
        store.expect_create().returning(|_, _, _| Err(already_exists()));
        store.expect_replace().never();
        store
            .expect_merge_patch()
            .times(1)
            .withf(|_, _, name, patch| name == "cfg" && patch["data"]["k"] == "v")
            .returning(|_, _, _, patch| Ok(patch.clone()));

        let merge = ApplyOptions {
            overwrite: OverwritePolicy::Merge,
            ..Default::default()
        };
        let summary = apply_documents(&store, vec![configmap("cfg", "apps")], &merge)
            .await
            .unwrap();
        assert_eq!(summary.merged, 1);

        let skip = ApplyOptions {
            overwrite: OverwritePolicy::Skip,
            ..Default::default()
        };
        let summary = apply_documents(&store, vec![configmap("cfg", "apps")], &skip)
            .await
            .unwrap();
        assert_eq!(summary.unchanged, 1);
    }

    /// Story: Any other API error aborts the restore
    #[tokio::test]
    async fn story_other_errors_fail_fast() {
        let mut store = MockResourceStore::new();
        resolving(&mut store);
        namespaces_exist(&mut store);
        store
            .expect_create()
            .times(1)
            .returning(|_, _, _| Err(forbidden()));

        let result = apply_documents(
            &store,
            vec![configmap("a", "apps"), configmap("b", "apps")],
            &ApplyOptions::default(),
        )
        .await;
        assert_eq!(result.unwrap_err().api_code(), Some(403));
    }
}
