//! Conflict descriptors consumed by the resolver.
//!
//! Conflicts are explicit objects, not hidden errors. An external diff step
//! detects divergence between the control-plane and downstream copies of an
//! object and hands the resolver a [`Conflict`] describing every divergent
//! field. This crate only consumes these descriptors; it never computes them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::ResourceRef;

/// The `resolution` hint meaning the field exists on the control plane but
/// was never materialized downstream.
pub const MISSING_IN_DOWNSTREAM: &str = "missing_in_downstream";

/// How severe a divergence is, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// Cosmetic divergence, safe to auto-resolve.
    Low,
    /// Divergence in non-critical behavior.
    Medium,
    /// Divergence that changes workload behavior.
    High,
    /// Divergence that risks data loss or outage.
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One divergent field between the two copies of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Dotted path of the field (e.g. `spec.replicas`,
    /// `metadata.annotations.team`).
    pub path: String,

    /// Diff-supplied resolution hint. [`MISSING_IN_DOWNSTREAM`] is the one
    /// value with defined semantics; anything else is opaque to the resolver.
    pub resolution: String,

    /// The field's value as computed by the control plane.
    pub control_plane_value: Value,

    /// The field's value as observed downstream.
    pub downstream_value: Value,
}

impl FieldConflict {
    /// Creates a field conflict.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        resolution: impl Into<String>,
        control_plane_value: Value,
        downstream_value: Value,
    ) -> Self {
        Self {
            path: path.into(),
            resolution: resolution.into(),
            control_plane_value,
            downstream_value,
        }
    }

    /// Returns true if the field was never materialized downstream.
    #[must_use]
    pub fn is_missing_in_downstream(&self) -> bool {
        self.resolution == MISSING_IN_DOWNSTREAM
    }
}

/// A divergence between the control-plane and downstream copies of an object.
///
/// Produced by an external diff component; consumed read-only by
/// [`crate::resolve::ConflictResolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Identity of the divergent object.
    pub resource: ResourceRef,

    /// Diff-supplied conflict category (opaque to the resolver, stamped into
    /// manual-resolution annotations).
    pub conflict_type: String,

    /// How severe the divergence is.
    pub severity: ConflictSeverity,

    /// Every divergent field.
    pub fields: Vec<FieldConflict>,
}

impl Conflict {
    /// Creates a conflict descriptor.
    #[must_use]
    pub fn new(
        resource: ResourceRef,
        conflict_type: impl Into<String>,
        severity: ConflictSeverity,
        fields: Vec<FieldConflict>,
    ) -> Self {
        Self {
            resource,
            conflict_type: conflict_type.into(),
            severity,
            fields,
        }
    }

    /// Returns the number of divergent fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
