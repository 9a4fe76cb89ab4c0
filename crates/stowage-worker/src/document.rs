//! Untyped resource documents
//!
//! Exported and restored objects are plain `serde_json::Value` trees. This
//! module holds the handful of operations both directions share: field
//! stripping, ordering, the kind deny-list and stream encoding.

use serde_json::Value;
use stowage_common::crd::ExportFormat;
use stowage_common::kube_utils::kind_priority;
use stowage_common::yaml::{parse_yaml_multi, to_yaml};
use stowage_common::Error;

/// Separator written before every document in a stream
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Annotation kubectl uses to remember the last applied manifest
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Kinds never exported or restored
pub const DENIED_KINDS: &[&str] = &[
    "Event",
    "Lease",
    "ControllerRevision",
    "ReplicaSet",
    "Pod",
    "EndpointSlice",
    "Endpoints",
    "Binding",
];

const METADATA_BOOKKEEPING: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "managedFields",
    "selfLink",
    "creationTimestamp",
];

const SERVICE_ASSIGNED_FIELDS: &[&str] = &["clusterIP", "clusterIPs", "healthCheckNodePort"];

/// Kind of a document, empty when absent
pub fn kind_of(doc: &Value) -> &str {
    doc.get("kind").and_then(Value::as_str).unwrap_or_default()
}

/// apiVersion of a document, empty when absent
pub fn api_version_of(doc: &Value) -> &str {
    doc.get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// metadata.name of a document, empty when absent
pub fn name_of(doc: &Value) -> &str {
    doc.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// metadata.namespace of a document, `None` when absent or empty
pub fn namespace_of(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
}

/// Set metadata.namespace, creating metadata if needed
pub fn set_namespace(doc: &mut Value, namespace: &str) {
    if let Some(meta) = metadata_mut(doc) {
        meta.insert(
            "namespace".to_string(),
            Value::String(namespace.to_string()),
        );
    }
}

/// metadata.resourceVersion of a document
pub fn resource_version_of(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

/// Set or clear metadata.resourceVersion
pub fn set_resource_version(doc: &mut Value, version: Option<&str>) {
    if let Some(meta) = metadata_mut(doc) {
        match version {
            Some(v) => {
                meta.insert("resourceVersion".to_string(), Value::String(v.to_string()));
            }
            None => {
                meta.remove("resourceVersion");
            }
        }
    }
}

/// Whether every selector annotation is present on the document with an equal value
pub fn matches_annotations(
    doc: &Value,
    selector: &std::collections::BTreeMap<String, String>,
) -> bool {
    if selector.is_empty() {
        return true;
    }
    let annotations = doc.pointer("/metadata/annotations");
    selector.iter().all(|(key, expected)| {
        annotations
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            == Some(expected.as_str())
    })
}

/// Whether a kind is on the fixed deny-list
pub fn is_denied_kind(kind: &str) -> bool {
    DENIED_KINDS.contains(&kind)
}

/// Drop server-assigned state so a document can be re-created elsewhere
///
/// Idempotent: sanitizing a sanitized document changes nothing.
pub fn sanitize(doc: &mut Value) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    obj.remove("status");

    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in METADATA_BOOKKEEPING {
            meta.remove(*field);
        }
        if let Some(annotations) = meta.get_mut("annotations").and_then(Value::as_object_mut) {
            annotations.remove(LAST_APPLIED_ANNOTATION);
        }
    }

    if obj.get("kind").and_then(Value::as_str) == Some("Service") {
        if let Some(spec) = obj.get_mut("spec").and_then(Value::as_object_mut) {
            for field in SERVICE_ASSIGNED_FIELDS {
                spec.remove(*field);
            }
        }
    }
}

/// Stable-sort documents so dependencies come before dependents
pub fn sort_by_priority(docs: &mut [Value]) {
    docs.sort_by_key(|doc| kind_priority(kind_of(doc)));
}

/// Lowercase a generated object name, replace underscores and cap it at 63 characters
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .replace('_', "-")
        .chars()
        .take(63)
        .collect()
}

/// Serialize documents as a `---`-separated stream
pub fn encode_documents(docs: &[Value], format: ExportFormat) -> Result<Vec<u8>, Error> {
    let mut out = String::new();
    for doc in docs {
        let body = match format {
            ExportFormat::Yaml => to_yaml(doc)?,
            ExportFormat::Json => {
                let mut s = serde_json::to_string(doc).map_err(|e| {
                    Error::serialization_for_kind(kind_of(doc), e.to_string())
                })?;
                s.push('\n');
                s
            }
        };
        if body.trim().is_empty() {
            continue;
        }
        out.push_str(DOCUMENT_SEPARATOR);
        out.push_str(&body);
    }
    Ok(out.into_bytes())
}

/// Parse a `---`-separated stream back into documents
///
/// Empty documents are dropped.
pub fn decode_documents(data: &[u8], format: ExportFormat) -> Result<Vec<Value>, Error> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::serialization(format!("document stream is not UTF-8: {}", e)))?;

    let docs = match format {
        ExportFormat::Yaml => parse_yaml_multi(text)?,
        ExportFormat::Json => split_stream(text)
            .map(|chunk| {
                serde_json::from_str::<Value>(chunk)
                    .map_err(|e| Error::serialization(format!("invalid JSON document: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(docs
        .into_iter()
        .filter(|d| d.as_object().is_some_and(|o| !o.is_empty()))
        .collect())
}

fn split_stream(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n---")
        .map(|chunk| chunk.trim().trim_start_matches("---").trim())
        .filter(|chunk| !chunk.is_empty())
}

fn metadata_mut(doc: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    let obj = doc.as_object_mut()?;
    obj.entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn live_service() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "web",
                "namespace": "apps",
                "uid": "0d5c",
                "resourceVersion": "4412",
                "generation": 2,
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "selfLink": "/api/v1/namespaces/apps/services/web",
                "managedFields": [{"manager": "kubectl"}],
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    "team": "payments"
                }
            },
            "spec": {
                "clusterIP": "10.0.0.12",
                "clusterIPs": ["10.0.0.12"],
                "healthCheckNodePort": 31000,
                "ports": [{"port": 80}]
            },
            "status": {"loadBalancer": {}}
        })
    }

    #[test]
    fn test_sanitize_strips_server_state() {
        let mut doc = live_service();
        sanitize(&mut doc);

        assert_eq!(
            doc,
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": "web",
                    "namespace": "apps",
                    "annotations": {"team": "payments"}
                },
                "spec": {"ports": [{"port": 80}]}
            })
        );
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let mut once = live_service();
        sanitize(&mut once);
        let mut twice = once.clone();
        sanitize(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sanitize_keeps_cluster_ip_on_other_kinds() {
        let mut doc = json!({
            "kind": "Widget",
            "metadata": {"name": "w"},
            "spec": {"clusterIP": "keep"}
        });
        sanitize(&mut doc);
        assert_eq!(doc["spec"]["clusterIP"], "keep");
    }

    #[test]
    fn test_priority_sort_is_stable() {
        let mut docs = vec![
            json!({"kind": "Deployment", "metadata": {"name": "api"}}),
            json!({"kind": "ConfigMap", "metadata": {"name": "a"}}),
            json!({"kind": "Namespace", "metadata": {"name": "apps"}}),
            json!({"kind": "ConfigMap", "metadata": {"name": "b"}}),
        ];
        sort_by_priority(&mut docs);

        let order: Vec<(&str, &str)> = docs.iter().map(|d| (kind_of(d), name_of(d))).collect();
        assert_eq!(
            order,
            vec![
                ("Namespace", "apps"),
                ("ConfigMap", "a"),
                ("ConfigMap", "b"),
                ("Deployment", "api"),
            ]
        );
    }

    #[test]
    fn test_annotation_selector_requires_all_keys() {
        let doc = json!({"metadata": {"annotations": {"a": "1", "b": "2"}}});
        let all = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let wrong = BTreeMap::from([("a".to_string(), "2".to_string())]);
        let missing = BTreeMap::from([("c".to_string(), "3".to_string())]);

        assert!(matches_annotations(&doc, &BTreeMap::new()));
        assert!(matches_annotations(&doc, &all));
        assert!(!matches_annotations(&doc, &wrong));
        assert!(!matches_annotations(&doc, &missing));
        assert!(!matches_annotations(&json!({"metadata": {}}), &all));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Nightly_DB-data-0"), "nightly-db-data-0");
        let long = "x".repeat(80);
        assert_eq!(sanitize_name(&long).len(), 63);
    }

    #[test]
    fn test_yaml_stream_round_trip() {
        let docs = vec![
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "apps"}}),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg", "namespace": "apps"}, "data": {"k": "v"}}),
        ];
        let bytes = encode_documents(&docs, ExportFormat::Yaml).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("---\n"));
        assert_eq!(text.matches("---\n").count(), 2);
        assert_eq!(decode_documents(&bytes, ExportFormat::Yaml).unwrap(), docs);
    }

    #[test]
    fn test_configmap_values_that_look_like_floats_survive_yaml() {
        let docs = vec![json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "limits", "namespace": "apps"},
            "data": {
                "a": "NaN", "b": "nan", "c": "inf", "d": "Infinity",
                "e": "-inf", "f": "infinity", "g": "+inf", "h": "1e400"
            }
        })];
        let bytes = encode_documents(&docs, ExportFormat::Yaml).unwrap();
        let decoded = decode_documents(&bytes, ExportFormat::Yaml).unwrap();
        assert_eq!(decoded, docs);
        assert_eq!(decoded[0]["data"]["h"], "1e400");
    }

    #[test]
    fn test_json_stream_round_trip() {
        let docs = vec![
            json!({"kind": "Namespace", "metadata": {"name": "apps"}}),
            json!({"kind": "Secret", "metadata": {"name": "s"}, "data": {"password": "LS0tCg=="}}),
        ];
        let bytes = encode_documents(&docs, ExportFormat::Json).unwrap();
        assert_eq!(decode_documents(&bytes, ExportFormat::Json).unwrap(), docs);
    }

    #[test]
    fn test_empty_stream_decodes_to_nothing() {
        assert!(decode_documents(b"", ExportFormat::Yaml).unwrap().is_empty());
        assert!(decode_documents(b"", ExportFormat::Json).unwrap().is_empty());
        assert!(encode_documents(&[], ExportFormat::Yaml).unwrap().is_empty());
    }

    #[test]
    fn test_namespace_and_version_accessors() {
        let mut doc = json!({"kind": "ConfigMap", "metadata": {"name": "c", "resourceVersion": "7"}});
        assert_eq!(namespace_of(&doc), None);
        set_namespace(&mut doc, "restored");
        assert_eq!(namespace_of(&doc), Some("restored"));

        assert_eq!(resource_version_of(&doc), Some("7"));
        set_resource_version(&mut doc, None);
        assert_eq!(resource_version_of(&doc), None);
        set_resource_version(&mut doc, Some("9"));
        assert_eq!(resource_version_of(&doc), Some("9"));
    }
}
