//! Resource export engine
//!
//! Discovers served types, filters them against the request's
//! include/exclude lists, lists every retained type across the namespaces
//! in scope, and returns sanitized documents in dependency order.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use stowage_common::crd::{ExportFormat, NamespaceSelector, ResourceSelector};
use stowage_common::Error;

use crate::document::{
    encode_documents, is_denied_kind, matches_annotations, sanitize, sort_by_priority,
    DENIED_KINDS,
};
use crate::store::{DiscoveredType, ResourceStore};

/// What a backup covers
#[derive(Clone, Debug, PartialEq)]
pub enum BackupScope {
    /// The single namespace of a `Backup`
    Namespace(String),
    /// A `ClusterBackup`
    Cluster {
        /// Namespace include/exclude lists
        namespaces: NamespaceSelector,
        /// Whether cluster-scoped types are exported
        include_cluster_resources: bool,
    },
}

impl BackupScope {
    fn include_cluster_resources(&self) -> bool {
        match self {
            Self::Namespace(_) => false,
            Self::Cluster {
                include_cluster_resources,
                ..
            } => *include_cluster_resources,
        }
    }
}

/// Compute the namespaces a backup covers, sorted ascending
pub async fn resolve_namespaces(
    store: &dyn ResourceStore,
    scope: &BackupScope,
) -> Result<Vec<String>, Error> {
    let (included, excluded) = match scope {
        BackupScope::Namespace(ns) => return Ok(vec![ns.clone()]),
        BackupScope::Cluster { namespaces, .. } => (&namespaces.included, &namespaces.excluded),
    };

    let candidates = if included.is_empty() {
        store.list_namespaces().await?
    } else {
        included.clone()
    };

    let excluded: BTreeSet<&str> = excluded.iter().map(String::as_str).collect();
    let selected: BTreeSet<String> = candidates
        .into_iter()
        .filter(|ns| !excluded.contains(ns.as_str()))
        .collect();
    Ok(selected.into_iter().collect())
}

/// Lowercase names a type answers to: plural, kind, `plural.group`, `kind.group`
pub fn resource_identifiers(ty: &DiscoveredType) -> Vec<String> {
    let plural = ty.resource.plural.to_lowercase();
    let kind = ty.resource.kind.to_lowercase();
    let mut ids = vec![plural.clone(), kind.clone()];
    if !ty.resource.group.is_empty() {
        let group = ty.resource.group.to_lowercase();
        ids.push(format!("{}.{}", plural, group));
        ids.push(format!("{}.{}", kind, group));
    }
    ids
}

/// Include/exclude matching on resource identifiers
///
/// The fixed deny-list is always part of the exclusions. An exclusion match
/// wins over an inclusion match.
#[derive(Clone, Debug, Default)]
pub struct TypeFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl TypeFilter {
    /// Build a filter from user-supplied lists
    pub fn new(included: &[String], excluded: &[String]) -> Self {
        let normalize = |s: &String| s.trim().to_lowercase();
        let mut exclude: BTreeSet<String> = DENIED_KINDS.iter().map(|k| k.to_lowercase()).collect();
        exclude.extend(excluded.iter().map(normalize));
        Self {
            include: included
                .iter()
                .map(normalize)
                .filter(|s| !s.is_empty())
                .collect(),
            exclude,
        }
    }

    /// Whether a type passes the filter
    pub fn allows(&self, ty: &DiscoveredType) -> bool {
        let ids = resource_identifiers(ty);
        if ids.iter().any(|id| self.exclude.contains(id)) {
            return false;
        }
        self.include.is_empty() || ids.iter().any(|id| self.include.contains(id))
    }
}

/// Everything the export engine needs to know about a request
#[derive(Clone, Debug)]
pub struct ExportPlan {
    /// What the backup covers
    pub scope: BackupScope,
    /// Filters from the request
    pub resources: ResourceSelector,
    /// Output format
    pub format: ExportFormat,
}

impl ExportPlan {
    fn label_selector(&self) -> Option<String> {
        self.resources
            .label_selector
            .as_ref()
            .and_then(|s| s.to_query())
    }

    fn annotation_selector(&self) -> &BTreeMap<String, String> {
        &self.resources.annotation_selector
    }
}

fn exportable(ty: &DiscoveredType, filter: &TypeFilter) -> bool {
    !ty.resource.plural.contains('/')
        && ty.listable
        && !is_denied_kind(&ty.resource.kind)
        && filter.allows(ty)
}

/// Collect sanitized documents for every retained type, in priority order
///
/// A failed list on one type is logged and skipped; a failed discovery aborts.
pub async fn collect_resources(
    store: &dyn ResourceStore,
    plan: &ExportPlan,
    namespaces: &[String],
) -> Result<Vec<Value>, Error> {
    let filter = TypeFilter::new(
        &plan.resources.included_resources,
        &plan.resources.excluded_resources,
    );
    let selector = plan.label_selector();
    let include_cluster = plan.scope.include_cluster_resources();

    let mut docs = Vec::new();
    for ty in store.discover().await? {
        if !exportable(&ty, &filter) {
            continue;
        }

        let targets: Vec<Option<String>> = if ty.namespaced {
            namespaces.iter().cloned().map(Some).collect()
        } else if include_cluster {
            vec![None]
        } else {
            continue;
        };

        for namespace in targets {
            let items = match store.list(&ty, namespace.clone(), selector.clone()).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        kind = %ty.resource.kind,
                        namespace = ?namespace,
                        error = %e,
                        "skipping resource type that could not be listed"
                    );
                    continue;
                }
            };
            for mut doc in items {
                if !matches_annotations(&doc, plan.annotation_selector()) {
                    continue;
                }
                sanitize(&mut doc);
                docs.push(doc);
            }
        }
    }

    sort_by_priority(&mut docs);
    debug!(count = docs.len(), "collected resources for export");
    Ok(docs)
}

/// Export the request's resources as a serialized document stream
pub async fn export_resources(
    store: &dyn ResourceStore,
    plan: &ExportPlan,
    namespaces: &[String],
) -> Result<Vec<u8>, Error> {
    let docs = collect_resources(store, plan, namespaces).await?;
    encode_documents(&docs, plan.format)
}
