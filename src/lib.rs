//! # Converge - Desired-State Reconciliation Engine
//!
//! Converge pushes control-plane desired state onto a downstream system and
//! reconciles the divergences it finds there. It is the write half of a sync
//! pipeline: an external diff step detects drift; this crate retries, applies,
//! and resolves.
//!
//! ## Core Concepts
//!
//! - **RemoteObject**: the unstructured object model both sides exchange
//! - **RetryExecutor**: jittered exponential backoff around any fallible async operation
//! - **ApplyEngine**: strategy-dispatched convergence (server-side apply, strategic merge, replace)
//! - **ConflictResolver**: reconciles control-plane and downstream copies of a divergent object
//! - **ResourceClient**: the injected backend boundary; the core has no compile-time
//!   dependency on any specific orchestrator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use converge::{ApplyEngine, EngineConfig, MemoryClient, RemoteObject, RetryPolicy};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = ApplyEngine::new(
//!     Arc::new(MemoryClient::new()),
//!     EngineConfig::default(),
//!     RetryPolicy::default(),
//! )?;
//!
//! let desired = RemoteObject::new("apps/v1", "Widget", "w1")
//!     .with_namespace("prod")
//!     .with_spec(json!({"replicas": 3}));
//!
//! let result = engine.apply(&CancellationToken::new(), &desired).await;
//! assert!(result.success);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod conflict;
pub mod error;
pub mod naming;
pub mod object;
pub mod outcome;
pub mod reference;

// Engines and the backend boundary
pub mod apply;
pub mod client;
pub mod resolve;
pub mod retry;

// Re-export primary types at crate root for convenience
pub use conflict::{Conflict, ConflictSeverity, FieldConflict, MISSING_IN_DOWNSTREAM};
pub use error::{ClientError, ConvergeError, ConvergeResult, ErrorKind};
pub use object::{ObjectMeta, RemoteObject};
pub use outcome::{ApplyOutcome, ApplyResult, BatchResult};
pub use reference::ResourceRef;

pub use apply::{ApplyEngine, ApplyStrategy, EngineConfig};
pub use client::{
    DeleteOptions, ListOptions, MemoryClient, PatchKind, PatchRequest, ResourceClient,
};
pub use resolve::{ConflictResolver, ResolutionResult, ResolutionStrategy};
pub use retry::{RetryExecutor, RetryPolicy, RetryPredicate};
