//! Conflict resolution between control-plane and downstream object copies.
//!
//! The resolver is pure: a function of its inputs plus the configured
//! strategy. Inputs are borrowed read-only and cloned on entry; every merged
//! object in a [`ResolutionResult`] is freshly owned.

mod strategies;

use serde::{Deserialize, Serialize};

use crate::conflict::{Conflict, FieldConflict};
use crate::error::ConvergeResult;
use crate::object::RemoteObject;

/// Annotation flagging a downstream-wins result as pending propagation back
/// to the control plane.
pub const ANNOTATION_PENDING_PROPAGATION: &str = "converge.io/pending-propagation";

/// Annotation carrying the conflict category on a manually-paused object.
pub const ANNOTATION_CONFLICT_TYPE: &str = "converge.io/conflict-type";

/// Annotation carrying the conflict severity on a manually-paused object.
pub const ANNOTATION_CONFLICT_SEVERITY: &str = "converge.io/conflict-severity";

/// Annotation marking an object as excluded from automatic convergence until
/// a human intervenes.
pub const ANNOTATION_SYNC_PAUSED: &str = "converge.io/sync-paused";

/// Annotation carrying the UTC timestamp at which sync was paused.
pub const ANNOTATION_SYNC_PAUSED_AT: &str = "converge.io/sync-paused-at";

/// How conflicting object copies are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The control-plane copy is authoritative; downstream-owned fields are
    /// preserved.
    ControlPlaneWins,

    /// The downstream copy is authoritative; the result is flagged for
    /// propagation back to the control plane.
    DownstreamWins,

    /// Field-by-field reconciliation with the control plane winning
    /// collisions.
    Merge,

    /// Never auto-resolve; annotate the object so a human can intervene.
    Manual,
}

impl ResolutionStrategy {
    /// Returns a short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ControlPlaneWins => "control_plane_wins",
            Self::DownstreamWins => "downstream_wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionResult {
    /// Whether every divergent field was reconciled. `Manual` always reports
    /// `false`.
    pub resolved: bool,

    /// The reconciled object, freshly owned.
    pub merged: RemoteObject,

    /// Fields the strategy could not reconcile. For the automatic strategies
    /// `resolved == unresolved.is_empty()`.
    pub unresolved: Vec<FieldConflict>,
}

/// Resolves conflicts with a fixed strategy.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy.
    #[must_use]
    pub const fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Returns the configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Reconciles the two copies of a divergent object.
    ///
    /// Neither input is ever mutated; the merged object in the result is a
    /// fresh copy.
    ///
    /// # Errors
    /// `ConvergeError::MissingObject` when the strategy's required input is
    /// `None`.
    pub fn resolve(
        &self,
        control_plane: Option<&RemoteObject>,
        downstream: Option<&RemoteObject>,
        conflict: &Conflict,
    ) -> ConvergeResult<ResolutionResult> {
        let result = match self.strategy {
            ResolutionStrategy::ControlPlaneWins => {
                strategies::control_plane_wins(control_plane, downstream)
            }
            ResolutionStrategy::DownstreamWins => strategies::downstream_wins(downstream),
            ResolutionStrategy::Merge => strategies::merge(control_plane, downstream, conflict),
            ResolutionStrategy::Manual => strategies::manual(control_plane, downstream, conflict),
        }?;

        tracing::debug!(
            resource = %conflict.resource,
            strategy = self.strategy.name(),
            severity = %conflict.severity,
            fields = conflict.field_count(),
            unresolved = result.unresolved.len(),
            "conflict resolution finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::conflict::ConflictSeverity;
    use crate::error::ConvergeError;
    use crate::reference::ResourceRef;

    use super::*;

    fn conflict(fields: Vec<FieldConflict>) -> Conflict {
        Conflict::new(
            ResourceRef::namespaced("apps", "v1", "widgets", "prod", "w1"),
            "spec_drift",
            ConflictSeverity::High,
            fields,
        )
    }

    fn cp_object() -> RemoteObject {
        RemoteObject::new("apps/v1", "Widget", "w1")
            .with_namespace("prod")
            .with_spec(json!({"replicas": 3}))
            .with_label("app", "widget")
    }

    fn downstream_object() -> RemoteObject {
        let mut obj = cp_object().with_spec(json!({"replicas": 5}));
        obj.metadata.uid = Some("uid-1".into());
        obj.metadata.resource_version = Some("42".into());
        obj.metadata.generation = Some(7);
        obj.status = json!({"ready_replicas": 5});
        obj
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(ResolutionStrategy::ControlPlaneWins.name(), "control_plane_wins");
        assert_eq!(ResolutionStrategy::Manual.name(), "manual");
    }

    #[test]
    fn test_strategy_serde_snake_case() {
        let json = serde_json::to_string(&ResolutionStrategy::DownstreamWins).unwrap();
        assert_eq!(json, "\"downstream_wins\"");
        let back: ResolutionStrategy = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(back, ResolutionStrategy::Merge);
    }

    #[test]
    fn test_missing_required_inputs() {
        let c = conflict(vec![]);
        let cp = cp_object();
        let down = downstream_object();

        let err = ConflictResolver::new(ResolutionStrategy::ControlPlaneWins)
            .resolve(None, Some(&down), &c)
            .unwrap_err();
        assert!(matches!(err, ConvergeError::MissingObject { .. }));

        let err = ConflictResolver::new(ResolutionStrategy::DownstreamWins)
            .resolve(Some(&cp), None, &c)
            .unwrap_err();
        assert!(matches!(err, ConvergeError::MissingObject { .. }));

        let err = ConflictResolver::new(ResolutionStrategy::Merge)
            .resolve(Some(&cp), None, &c)
            .unwrap_err();
        assert!(matches!(err, ConvergeError::MissingObject { .. }));

        let err = ConflictResolver::new(ResolutionStrategy::Manual)
            .resolve(None, None, &c)
            .unwrap_err();
        assert!(matches!(err, ConvergeError::MissingObject { .. }));
    }

    #[test]
    fn test_control_plane_wins_preserves_downstream_status() {
        let cp = cp_object();
        let down = downstream_object();
        let result = ConflictResolver::new(ResolutionStrategy::ControlPlaneWins)
            .resolve(Some(&cp), Some(&down), &conflict(vec![]))
            .unwrap();

        assert!(result.resolved);
        assert!(result.unresolved.is_empty());
        assert_eq!(result.merged.spec, cp.spec);
        assert_eq!(result.merged.status, down.status);
        assert_eq!(result.merged.metadata.uid, down.metadata.uid);
        assert_eq!(
            result.merged.metadata.resource_version,
            down.metadata.resource_version
        );
        assert_eq!(result.merged.metadata.generation, down.metadata.generation);
    }

    #[test]
    fn test_control_plane_wins_without_downstream() {
        let cp = cp_object();
        let result = ConflictResolver::new(ResolutionStrategy::ControlPlaneWins)
            .resolve(Some(&cp), None, &conflict(vec![]))
            .unwrap();

        assert!(result.resolved);
        assert_eq!(result.merged, cp);
    }

    #[test]
    fn test_downstream_wins_flags_pending_propagation() {
        let down = downstream_object();
        let result = ConflictResolver::new(ResolutionStrategy::DownstreamWins)
            .resolve(None, Some(&down), &conflict(vec![]))
            .unwrap();

        assert!(result.resolved);
        assert_eq!(result.merged.spec, down.spec);
        assert_eq!(
            result
                .merged
                .metadata
                .annotations
                .get(ANNOTATION_PENDING_PROPAGATION)
                .map(String::as_str),
            Some("true")
        );
        // Input untouched.
        assert!(!down
            .metadata
            .annotations
            .contains_key(ANNOTATION_PENDING_PROPAGATION));
    }

    #[test]
    fn test_merge_all_resolvable() {
        let cp = cp_object();
        let down = downstream_object();
        let c = conflict(vec![
            FieldConflict::new("spec.replicas", "drift", json!(3), json!(5)),
            FieldConflict::new(
                "spec.image",
                crate::conflict::MISSING_IN_DOWNSTREAM,
                json!("widget:1.2"),
                json!(null),
            ),
        ]);

        let result = ConflictResolver::new(ResolutionStrategy::Merge)
            .resolve(Some(&cp), Some(&down), &c)
            .unwrap();

        assert!(result.resolved);
        assert!(result.unresolved.is_empty());
        // Control plane wins the drifted scalar and keeps the missing field.
        assert_eq!(result.merged.value_at("spec.replicas"), Some(json!(3)));
        // Downstream-owned fields reapplied last.
        assert_eq!(result.merged.status, down.status);
    }

    #[test]
    fn test_merge_unions_map_valued_fields() {
        let cp = cp_object().with_spec(json!({
            "replicas": 3,
            "selector": {"app": "widget", "tier": "web"}
        }));
        let down = downstream_object().with_spec(json!({
            "replicas": 3,
            "selector": {"app": "widget-old", "zone": "us-east"}
        }));
        let c = conflict(vec![FieldConflict::new(
            "spec.selector",
            "drift",
            json!({"app": "widget", "tier": "web"}),
            json!({"app": "widget-old", "zone": "us-east"}),
        )]);

        let result = ConflictResolver::new(ResolutionStrategy::Merge)
            .resolve(Some(&cp), Some(&down), &c)
            .unwrap();

        assert!(result.resolved);
        assert_eq!(
            result.merged.value_at("spec.selector"),
            Some(json!({"app": "widget", "tier": "web", "zone": "us-east"}))
        );
    }

    #[test]
    fn test_merge_type_mismatch_is_unresolved() {
        let cp = cp_object();
        let down = downstream_object();
        let bad = FieldConflict::new(
            "spec.selector",
            "drift",
            json!("legacy-string"),
            json!(42),
        );
        let c = conflict(vec![
            FieldConflict::new("spec.replicas", "drift", json!(3), json!(5)),
            bad.clone(),
        ]);

        let result = ConflictResolver::new(ResolutionStrategy::Merge)
            .resolve(Some(&cp), Some(&down), &c)
            .unwrap();

        assert!(!result.resolved);
        assert_eq!(result.unresolved, vec![bad]);
    }

    #[test]
    fn test_manual_never_resolves() {
        let cp = cp_object();
        let fields = vec![FieldConflict::new(
            "spec.replicas",
            "drift",
            json!(3),
            json!(5),
        )];
        let c = conflict(fields.clone());

        let result = ConflictResolver::new(ResolutionStrategy::Manual)
            .resolve(Some(&cp), None, &c)
            .unwrap();

        assert!(!result.resolved);
        assert_eq!(result.unresolved, fields);

        let annotations = &result.merged.metadata.annotations;
        assert_eq!(
            annotations.get(ANNOTATION_CONFLICT_TYPE).map(String::as_str),
            Some("spec_drift")
        );
        assert_eq!(
            annotations
                .get(ANNOTATION_CONFLICT_SEVERITY)
                .map(String::as_str),
            Some("high")
        );
        assert_eq!(
            annotations.get(ANNOTATION_SYNC_PAUSED).map(String::as_str),
            Some("true")
        );
        assert!(annotations.contains_key(ANNOTATION_SYNC_PAUSED_AT));
    }

    #[test]
    fn test_manual_with_no_fields_still_unresolved() {
        let down = downstream_object();
        let result = ConflictResolver::new(ResolutionStrategy::Manual)
            .resolve(None, Some(&down), &conflict(vec![]))
            .unwrap();

        assert!(!result.resolved);
        assert!(result.unresolved.is_empty());
        assert_eq!(result.merged.spec, down.spec);
    }
}
