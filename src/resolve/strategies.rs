//! The four resolution strategies.
//!
//! Every strategy clones its borrowed inputs before touching anything, so
//! the caller's objects are never mutated.

use std::mem;

use serde_json::{Map, Value};

use crate::conflict::{Conflict, FieldConflict};
use crate::error::{ConvergeError, ConvergeResult};
use crate::object::RemoteObject;

use super::{
    ResolutionResult, ANNOTATION_CONFLICT_SEVERITY, ANNOTATION_CONFLICT_TYPE,
    ANNOTATION_PENDING_PROPAGATION, ANNOTATION_SYNC_PAUSED, ANNOTATION_SYNC_PAUSED_AT,
};

pub(super) fn control_plane_wins(
    control_plane: Option<&RemoteObject>,
    downstream: Option<&RemoteObject>,
) -> ConvergeResult<ResolutionResult> {
    let control_plane = control_plane.ok_or(ConvergeError::MissingObject {
        side: "control-plane",
        strategy: "control_plane_wins",
    })?;

    let mut merged = control_plane.clone();
    if let Some(downstream) = downstream {
        merged.adopt_server_managed(downstream);
    }
    Ok(ResolutionResult {
        resolved: true,
        merged,
        unresolved: Vec::new(),
    })
}

pub(super) fn downstream_wins(
    downstream: Option<&RemoteObject>,
) -> ConvergeResult<ResolutionResult> {
    let downstream = downstream.ok_or(ConvergeError::MissingObject {
        side: "downstream",
        strategy: "downstream_wins",
    })?;

    let mut merged = downstream.clone();
    merged.annotate(ANNOTATION_PENDING_PROPAGATION, "true");
    Ok(ResolutionResult {
        resolved: true,
        merged,
        unresolved: Vec::new(),
    })
}

pub(super) fn merge(
    control_plane: Option<&RemoteObject>,
    downstream: Option<&RemoteObject>,
    conflict: &Conflict,
) -> ConvergeResult<ResolutionResult> {
    let control_plane = control_plane.ok_or(ConvergeError::MissingObject {
        side: "control-plane",
        strategy: "merge",
    })?;
    let downstream = downstream.ok_or(ConvergeError::MissingObject {
        side: "downstream",
        strategy: "merge",
    })?;

    let mut merged = control_plane.clone();
    let mut unresolved = Vec::new();

    for field in &conflict.fields {
        match reconcile_field(field) {
            FieldAction::Keep => {}
            FieldAction::Write(value) => {
                if !write_merged_value(&mut merged, &field.path, value) {
                    unresolved.push(field.clone());
                }
            }
            FieldAction::Unresolved => unresolved.push(field.clone()),
        }
    }

    merged.adopt_server_managed(downstream);
    Ok(ResolutionResult {
        resolved: unresolved.is_empty(),
        merged,
        unresolved,
    })
}

pub(super) fn manual(
    control_plane: Option<&RemoteObject>,
    downstream: Option<&RemoteObject>,
    conflict: &Conflict,
) -> ConvergeResult<ResolutionResult> {
    let base = control_plane
        .or(downstream)
        .ok_or(ConvergeError::MissingObject {
            side: "control-plane or downstream",
            strategy: "manual",
        })?;

    let mut merged = base.clone();
    merged.annotate(ANNOTATION_CONFLICT_TYPE, conflict.conflict_type.clone());
    merged.annotate(
        ANNOTATION_CONFLICT_SEVERITY,
        conflict.severity.to_string(),
    );
    merged.annotate(ANNOTATION_SYNC_PAUSED, "true");
    merged.annotate(
        ANNOTATION_SYNC_PAUSED_AT,
        chrono::Utc::now().to_rfc3339(),
    );

    Ok(ResolutionResult {
        resolved: false,
        merged,
        unresolved: conflict.fields.clone(),
    })
}

/// Writes a reconciled value into the merged object. Whole-map paths
/// (`spec`, `metadata.labels`, `metadata.annotations`) are handled here;
/// everything else goes through the dotted-path setter.
fn write_merged_value(merged: &mut RemoteObject, path: &str, value: Value) -> bool {
    match path {
        "spec" => {
            merged.spec = value;
            true
        }
        "metadata.labels" | "metadata.annotations" => {
            let Value::Object(entries) = value else {
                return false;
            };
            entries
                .into_iter()
                .all(|(key, entry)| merged.set_value_at(&format!("{path}.{key}"), entry))
        }
        _ => merged.set_value_at(path, value),
    }
}

enum FieldAction {
    /// The control-plane value already in the merged clone stands.
    Keep,
    /// Write this reconciled value at the field's path.
    Write(Value),
    /// No valid merge exists for this field.
    Unresolved,
}

fn reconcile_field(field: &FieldConflict) -> FieldAction {
    match (&field.control_plane_value, &field.downstream_value) {
        // Map-valued pair: union, control plane wins collisions.
        (Value::Object(cp), Value::Object(down)) => {
            let mut union: Map<String, Value> = down.clone();
            for (key, value) in cp {
                union.insert(key.clone(), value.clone());
            }
            FieldAction::Write(Value::Object(union))
        }
        _ if field.is_missing_in_downstream() => FieldAction::Keep,
        (cp, down) => {
            // Two present values of different JSON types have no valid merge.
            if !cp.is_null() && !down.is_null() && mem::discriminant(cp) != mem::discriminant(down)
            {
                FieldAction::Unresolved
            } else {
                FieldAction::Keep
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn action_of(cp: Value, down: Value, resolution: &str) -> FieldAction {
        reconcile_field(&FieldConflict::new("spec.x", resolution, cp, down))
    }

    #[test]
    fn test_map_pair_unions_with_control_plane_priority() {
        let action = action_of(
            json!({"a": 1, "shared": "cp"}),
            json!({"b": 2, "shared": "down"}),
            "drift",
        );
        match action {
            FieldAction::Write(v) => {
                assert_eq!(v, json!({"a": 1, "b": 2, "shared": "cp"}));
            }
            _ => panic!("expected a write"),
        }
    }

    #[test]
    fn test_missing_in_downstream_keeps_control_plane() {
        let action = action_of(
            json!("widget:1.2"),
            json!(null),
            crate::conflict::MISSING_IN_DOWNSTREAM,
        );
        assert!(matches!(action, FieldAction::Keep));
    }

    #[test]
    fn test_same_type_drift_keeps_control_plane() {
        assert!(matches!(
            action_of(json!(3), json!(5), "drift"),
            FieldAction::Keep
        ));
        assert!(matches!(
            action_of(json!("a"), json!("b"), "drift"),
            FieldAction::Keep
        ));
    }

    #[test]
    fn test_type_mismatch_is_unresolved() {
        assert!(matches!(
            action_of(json!("s"), json!(1), "drift"),
            FieldAction::Unresolved
        ));
        assert!(matches!(
            action_of(json!([1]), json!(1), "drift"),
            FieldAction::Unresolved
        ));
    }

    #[test]
    fn test_whole_label_map_union_writes_entries() {
        let mut merged = RemoteObject::new("apps/v1", "Widget", "w1").with_label("app", "w1");
        let ok = write_merged_value(
            &mut merged,
            "metadata.labels",
            json!({"app": "w1", "tier": "web"}),
        );
        assert!(ok);
        assert_eq!(merged.metadata.labels["tier"], "web");
        assert_eq!(merged.metadata.labels["app"], "w1");
    }

    #[test]
    fn test_whole_spec_write_replaces() {
        let mut merged =
            RemoteObject::new("apps/v1", "Widget", "w1").with_spec(json!({"replicas": 3}));
        assert!(write_merged_value(&mut merged, "spec", json!({"replicas": 5, "extra": 1})));
        assert_eq!(merged.value_at("spec.replicas"), Some(json!(5)));
        assert_eq!(merged.value_at("spec.extra"), Some(json!(1)));
    }

    #[test]
    fn test_null_downstream_keeps_control_plane() {
        assert!(matches!(
            action_of(json!(3), json!(null), "drift"),
            FieldAction::Keep
        ));
    }
}
