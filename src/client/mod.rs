//! The remote resource client boundary.
//!
//! The engines have zero compile-time dependency on any specific backend:
//! the host supplies an implementation of [`ResourceClient`] (a real
//! orchestrator adapter, or [`MemoryClient`] for tests and embedded use).
//! The contract every implementation must honor:
//!
//! - every error maps to exactly one [`crate::ErrorKind`] — the retry policy
//!   and the delete-idempotency rule are driven by that classification;
//! - `update` enforces the optimistic-concurrency precondition: a write
//!   carrying a stale version token fails with `ErrorKind::Conflict`. The
//!   get-then-write sequences in the apply engine are not transactional and
//!   rely entirely on this check — a backend without conditional writes
//!   cannot guarantee linearizable convergence;
//! - implementations are safe for concurrent use (`Send + Sync`).

mod memory;

pub use memory::MemoryClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::object::RemoteObject;
use crate::reference::ResourceRef;

/// The wire kind of a patch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PatchKind {
    /// Apply-type patch: the server reconciles the full desired object,
    /// tracking field ownership per manager.
    Apply {
        /// Identity string owning the applied fields.
        field_manager: String,
        /// Overwrite fields owned by other managers instead of failing.
        force: bool,
    },

    /// Merge patch: the payload contains only the changed substructure.
    Merge,
}

impl PatchKind {
    /// Returns a short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Apply { .. } => "apply",
            Self::Merge => "merge",
        }
    }
}

/// A patch request: wire kind plus JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    /// How the server should interpret the payload.
    pub kind: PatchKind,
    /// The payload. Full object for apply-type patches, changed
    /// substructure only for merge patches.
    pub body: Value,
}

/// Options for delete calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Seconds the target may wait before hard-deleting, if it supports
    /// graceful deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<i64>,
}

/// Options for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Equality label selector; an object matches when every entry matches.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

/// Capability interface for one remote resource scope.
///
/// All calls are scoped by a [`ResourceRef`]; for `list` the reference's
/// `name` field is ignored.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetches one object.
    async fn get(&self, resource: &ResourceRef) -> Result<RemoteObject, ClientError>;

    /// Lists objects in the reference's resource/namespace scope.
    async fn list(
        &self,
        resource: &ResourceRef,
        opts: &ListOptions,
    ) -> Result<Vec<RemoteObject>, ClientError>;

    /// Creates an object, returning it with server-assigned fields set.
    async fn create(
        &self,
        resource: &ResourceRef,
        object: &RemoteObject,
    ) -> Result<RemoteObject, ClientError>;

    /// Replaces an object wholesale. A stale `resource_version` on `object`
    /// must fail with `ErrorKind::Conflict`.
    async fn update(
        &self,
        resource: &ResourceRef,
        object: &RemoteObject,
    ) -> Result<RemoteObject, ClientError>;

    /// Applies a patch, returning the server's resulting object.
    async fn patch(
        &self,
        resource: &ResourceRef,
        request: &PatchRequest,
    ) -> Result<RemoteObject, ClientError>;

    /// Deletes an object. Must fail with `ErrorKind::NotFound` when absent;
    /// the engine maps that to idempotent success.
    async fn delete(&self, resource: &ResourceRef, opts: &DeleteOptions)
        -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_kind_names() {
        let apply = PatchKind::Apply {
            field_manager: "converge".into(),
            force: true,
        };
        assert_eq!(apply.name(), "apply");
        assert_eq!(PatchKind::Merge.name(), "merge");
    }

    #[test]
    fn test_patch_kind_serde() {
        let apply = PatchKind::Apply {
            field_manager: "converge".into(),
            force: false,
        };
        let json = serde_json::to_string(&apply).unwrap();
        assert!(json.contains("\"type\":\"apply\""));
        assert!(json.contains("field_manager"));
    }

    #[test]
    fn test_default_options_serialize_empty() {
        let json = serde_json::to_string(&DeleteOptions::default()).unwrap();
        assert_eq!(json, "{}");
        let json = serde_json::to_string(&ListOptions::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
