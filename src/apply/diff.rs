//! Mutable-substructure diffing for strategic merge.
//!
//! Compares the parts of an object a control plane legitimately owns (spec,
//! labels, annotations) and emits a merge patch containing only the changed
//! substructure. Server-managed metadata never enters the comparison, so an
//! object that differs only in status or version tokens diffs as empty.
//!
//! Keys present downstream but absent from the desired object are left in
//! place: other actors may own them. A host that wants exclusive ownership
//! of the whole object uses the replace or server-side-apply strategies.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::object::RemoteObject;

/// Computes the merge patch that converges `existing`'s mutable substructure
/// to `desired`'s. Returns `None` when they already match.
#[must_use]
pub fn merge_patch(existing: &RemoteObject, desired: &RemoteObject) -> Option<Value> {
    let mut patch = Map::new();

    let mut metadata = Map::new();
    if let Some(labels) = map_diff(&existing.metadata.labels, &desired.metadata.labels) {
        metadata.insert("labels".to_string(), labels);
    }
    if let Some(annotations) = map_diff(
        &existing.metadata.annotations,
        &desired.metadata.annotations,
    ) {
        metadata.insert("annotations".to_string(), annotations);
    }
    if !metadata.is_empty() {
        patch.insert("metadata".to_string(), Value::Object(metadata));
    }

    if let Some(spec) = value_diff(&existing.spec, &desired.spec) {
        patch.insert("spec".to_string(), spec);
    }

    if patch.is_empty() {
        None
    } else {
        Some(Value::Object(patch))
    }
}

/// String-map diff: every desired entry that is absent or different in
/// `existing`. Additive only.
fn map_diff(
    existing: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Option<Value> {
    let changed: Map<String, Value> = desired
        .iter()
        .filter(|(k, v)| existing.get(*k) != Some(v))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    if changed.is_empty() {
        None
    } else {
        Some(Value::Object(changed))
    }
}

/// Recursive JSON diff: for object pairs, descend per desired key; for
/// anything else, the desired value replaces on inequality.
fn value_diff(existing: &Value, desired: &Value) -> Option<Value> {
    match (existing, desired) {
        (Value::Object(existing_map), Value::Object(desired_map)) => {
            let mut changed = Map::new();
            for (key, desired_entry) in desired_map {
                match existing_map.get(key) {
                    Some(existing_entry) => {
                        if let Some(diff) = value_diff(existing_entry, desired_entry) {
                            changed.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        changed.insert(key.clone(), desired_entry.clone());
                    }
                }
            }
            if changed.is_empty() {
                None
            } else {
                Some(Value::Object(changed))
            }
        }
        _ => {
            if existing == desired {
                None
            } else {
                Some(desired.clone())
            }
        }
    }
}
