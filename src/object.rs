//! The unstructured object model the engines operate on.
//!
//! A [`RemoteObject`] is the common shape of a resource on either side of the
//! reconciliation boundary: typed identity metadata plus loose `spec` and
//! `status` payloads. The mutable substructure (spec, labels, annotations) is
//! what the apply engine diffs and patches; the server-managed fields
//! (status, uid, resource version, generation) are owned by the downstream
//! target and are only ever copied, never computed here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity and bookkeeping metadata of a remote object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,

    /// Namespace, if the resource is namespaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Server-assigned unique identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Optimistic-concurrency version token. Server-managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Server-managed spec generation counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Identifying labels. Part of the mutable substructure.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Non-identifying annotations. Part of the mutable substructure.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A resource object as exchanged with the downstream target.
///
/// Deep copy is `Clone`: every field is owned data, so a clone shares nothing
/// with the original. The resolver's copy-on-entry ownership contract builds
/// on that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// API group/version string (e.g. `apps/v1`, or `v1` for the core group).
    pub api_version: String,

    /// Object kind (e.g. `Widget`).
    pub kind: String,

    /// Identity and bookkeeping metadata.
    pub metadata: ObjectMeta,

    /// Desired-state payload. Mutable substructure.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,

    /// Observed-state payload. Server-managed, owned by the downstream target.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,
}

impl RemoteObject {
    /// Creates a new object with empty spec and status.
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: name.into(),
                ..ObjectMeta::default()
            },
            spec: Value::Null,
            status: Value::Null,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// Sets the spec payload.
    #[must_use]
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets an annotation in place.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    /// Copies the server-managed fields (status, uid, resource version,
    /// generation) from `other` onto `self`.
    ///
    /// Used wherever a control-plane object is about to overwrite a
    /// downstream one: the downstream target stays the authority for what it
    /// observed and assigned.
    pub fn adopt_server_managed(&mut self, other: &Self) {
        self.status = other.status.clone();
        self.metadata.uid = other.metadata.uid.clone();
        self.metadata.resource_version = other.metadata.resource_version.clone();
        self.metadata.generation = other.metadata.generation;
    }

    /// Looks up a dotted-path value (e.g. `spec.replicas`,
    /// `metadata.labels.app`, `status.ready`).
    ///
    /// Returns `None` when any segment is missing. Label and annotation
    /// values come back as JSON strings; `metadata.name`/`metadata.namespace`
    /// are also addressable.
    #[must_use]
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        match segments.next()? {
            "spec" => value_at_segments(&self.spec, segments),
            "status" => value_at_segments(&self.status, segments),
            "metadata" => match segments.next()? {
                "name" => Some(Value::String(self.metadata.name.clone())),
                "namespace" => self
                    .metadata
                    .namespace
                    .as_ref()
                    .map(|ns| Value::String(ns.clone())),
                "labels" => map_lookup(&self.metadata.labels, segments),
                "annotations" => map_lookup(&self.metadata.annotations, segments),
                _ => None,
            },
            _ => None,
        }
    }

    /// Writes a dotted-path value, creating intermediate objects under `spec`
    /// as needed.
    ///
    /// Supported roots: `spec.*`, `metadata.labels.*`,
    /// `metadata.annotations.*` (the mutable substructure). Returns `false`
    /// for unsupported or server-managed paths, leaving the object untouched.
    pub fn set_value_at(&mut self, path: &str, value: Value) -> bool {
        let mut segments = path.splitn(2, '.');
        let (Some(root), rest) = (segments.next(), segments.next()) else {
            return false;
        };
        match (root, rest) {
            ("spec", Some(rest)) => set_at_segments(&mut self.spec, rest, value),
            ("metadata", Some(rest)) => {
                let mut parts = rest.splitn(2, '.');
                match (parts.next(), parts.next()) {
                    (Some("labels"), Some(key)) => {
                        map_insert(&mut self.metadata.labels, key, value)
                    }
                    (Some("annotations"), Some(key)) => {
                        map_insert(&mut self.metadata.annotations, key, value)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

fn value_at_segments<'a, I>(root: &Value, segments: I) -> Option<Value>
where
    I: Iterator<Item = &'a str>,
{
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn map_lookup<'a, I>(map: &BTreeMap<String, String>, mut segments: I) -> Option<Value>
where
    I: Iterator<Item = &'a str>,
{
    let key = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    map.get(key).map(|v| Value::String(v.clone()))
}

fn map_insert(map: &mut BTreeMap<String, String>, key: &str, value: Value) -> bool {
    let string_value = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    map.insert(key.to_string(), string_value);
    true
}

fn set_at_segments(root: &mut Value, path: &str, value: Value) -> bool {
    if !root.is_object() {
        *root = Value::Object(serde_json::Map::new());
    }

    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return false,
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            // Refuse to silently overwrite a scalar with an object.
            return false;
        }
        current = entry;
    }
    false
}
