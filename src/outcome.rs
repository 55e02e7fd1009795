//! Apply result and outcome types.
//!
//! Every apply call classifies what it actually *did* — create, update,
//! apply, replace, or nothing — separately from whether it succeeded, so a
//! caller can tell a no-op from a failure and skip redundant downstream
//! writes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConvergeError;
use crate::object::RemoteObject;
use crate::reference::ResourceRef;

/// What an apply call did. Exactly one per result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The object did not exist and was created.
    Create,
    /// An existing object was patched with a non-empty diff.
    Update,
    /// A server-side apply patch was issued.
    Apply,
    /// An existing object was replaced wholesale.
    Replace,
    /// The existing object already matched the desired state.
    NoOp,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Apply => "apply",
            Self::Replace => "replace",
            Self::NoOp => "no_op",
        };
        write!(f, "{s}")
    }
}

/// The result of converging one object.
///
/// Carries its own error instead of being wrapped in `Result`: batch apply
/// needs per-item failures as plain values that never abort sibling items.
#[derive(Debug)]
pub struct ApplyResult {
    /// Identity of the object this result is about.
    pub resource: ResourceRef,

    /// What the apply call did (best known outcome on failure).
    pub outcome: ApplyOutcome,

    /// Whether the operation succeeded.
    pub success: bool,

    /// The terminal error, if the operation failed.
    pub error: Option<ConvergeError>,

    /// The object as the server returned it (or the unchanged existing
    /// object for a no-op).
    pub applied: Option<RemoteObject>,

    /// Total attempts made, including the first (always >= 1).
    pub attempts: u32,

    /// Wall-clock time measured around the whole retry loop.
    pub duration: Duration,
}

impl ApplyResult {
    /// Creates a successful result.
    #[must_use]
    pub fn succeeded(
        resource: ResourceRef,
        outcome: ApplyOutcome,
        applied: RemoteObject,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            resource,
            outcome,
            success: true,
            error: None,
            applied: Some(applied),
            attempts: attempts.max(1),
            duration,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        resource: ResourceRef,
        outcome: ApplyOutcome,
        error: ConvergeError,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            resource,
            outcome,
            success: false,
            error: Some(error),
            applied: None,
            attempts: attempts.max(1),
            duration,
        }
    }

    /// Returns true if the apply made no observable change.
    #[must_use]
    pub const fn is_no_op(&self) -> bool {
        self.success && matches!(self.outcome, ApplyOutcome::NoOp)
    }
}

/// Aggregated result of a batch apply.
///
/// Invariant: `total == results.len() == succeeded + failed`.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// One result per input item, in input order.
    pub results: Vec<ApplyResult>,

    /// Number of items in the batch.
    pub total: usize,

    /// Number of items that converged successfully.
    pub succeeded: usize,

    /// Number of items that failed after retries.
    pub failed: usize,

    /// Wall-clock time for the whole batch.
    pub duration: Duration,
}

impl BatchResult {
    /// Builds a batch result from per-item results, computing the tallies.
    #[must_use]
    pub fn from_results(results: Vec<ApplyResult>, duration: Duration) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            results,
            duration,
        }
    }

    /// Returns true if every item in the batch succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
