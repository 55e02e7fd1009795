//! The apply engine.
//!
//! Converges remote state to a desired object via one of several strategies,
//! with every remote interaction wrapped by the retry executor. The engine
//! holds no mutable state: an injected client, an immutable configuration,
//! and a retry executor, so clones are cheap and concurrent calls need no
//! locking.

pub mod diff;

mod batch;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::{DeleteOptions, PatchKind, PatchRequest, ResourceClient};
use crate::error::ConvergeResult;
use crate::naming;
use crate::object::RemoteObject;
use crate::outcome::{ApplyOutcome, ApplyResult};
use crate::reference::ResourceRef;
use crate::retry::{RetryExecutor, RetryPolicy};

/// How the engine converges an existing object to the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategy {
    /// Apply-type patch of the full desired object, carrying a field-manager
    /// identity and a force-conflicts flag.
    ServerSideApply,

    /// Get, diff the mutable substructure, and merge-patch only the changed
    /// parts. Empty diff is a no-op.
    StrategicMerge,

    /// Get, copy the existing version token onto the desired object, and
    /// replace wholesale.
    Replace,
}

impl ApplyStrategy {
    /// The outcome this strategy reports when it mutates an existing object.
    /// Used as the best-known outcome for failed results.
    #[must_use]
    pub(crate) const fn nominal_outcome(self) -> ApplyOutcome {
        match self {
            Self::ServerSideApply => ApplyOutcome::Apply,
            Self::StrategicMerge => ApplyOutcome::Update,
            Self::Replace => ApplyOutcome::Replace,
        }
    }

    /// Returns a short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ServerSideApply => "server_side_apply",
            Self::StrategicMerge => "strategic_merge",
            Self::Replace => "replace",
        }
    }
}

/// Apply engine configuration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The convergence strategy.
    pub strategy: ApplyStrategy,

    /// Field-manager identity sent with apply-type patches.
    pub field_manager: String,

    /// Overwrite fields owned by other managers on apply-type patches.
    pub force_conflicts: bool,

    /// Authoritative kind -> plural resource name mappings, as obtained from
    /// API discovery. Kinds not listed here fall back to the lossy
    /// [`naming::guess_resource`] heuristic.
    pub resource_names: HashMap<String, String>,

    /// Concurrency limit used when a batch apply passes `0`.
    pub default_batch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: ApplyStrategy::StrategicMerge,
            field_manager: "converge".to_string(),
            force_conflicts: true,
            resource_names: HashMap::new(),
            default_batch_concurrency: 10,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration's constraints.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` for an empty field manager or
    /// a zero default batch concurrency.
    pub fn validate(&self) -> ConvergeResult<()> {
        if self.field_manager.trim().is_empty() {
            return Err(crate::error::ConvergeError::configuration(
                "field manager must be non-empty",
            ));
        }
        if self.default_batch_concurrency == 0 {
            return Err(crate::error::ConvergeError::configuration(
                "default batch concurrency must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Converges remote objects to desired state.
#[derive(Clone)]
pub struct ApplyEngine {
    client: Arc<dyn ResourceClient>,
    config: EngineConfig,
    retry: RetryExecutor,
}

impl fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApplyEngine {
    /// Creates an engine with the default retryability classification.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` if the config or policy is
    /// invalid.
    pub fn new(
        client: Arc<dyn ResourceClient>,
        config: EngineConfig,
        policy: RetryPolicy,
    ) -> ConvergeResult<Self> {
        Self::with_executor(client, config, RetryExecutor::new(policy)?)
    }

    /// Creates an engine around a pre-built retry executor.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` if the config is invalid.
    pub fn with_executor(
        client: Arc<dyn ResourceClient>,
        config: EngineConfig,
        retry: RetryExecutor,
    ) -> ConvergeResult<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Derives the resource reference for an object: group/version from its
    /// `api_version`, the resource name from the configured discovery
    /// mappings with the pluralization heuristic as fallback.
    #[must_use]
    pub fn resource_ref(&self, object: &RemoteObject) -> ResourceRef {
        let (group, version) = match object.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), object.api_version.clone()),
        };
        let resource = self
            .config
            .resource_names
            .get(&object.kind)
            .cloned()
            .unwrap_or_else(|| naming::guess_resource(&object.kind));
        ResourceRef {
            group,
            version,
            resource,
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone(),
        }
    }

    /// Converges one object to the desired state.
    ///
    /// The whole strategy body runs under the retry executor; attempts and
    /// wall-clock duration are measured around the retry loop, not around a
    /// single attempt. Failures are captured in the returned [`ApplyResult`]
    /// rather than raised, so batch callers can aggregate them as values.
    pub async fn apply(&self, cancel: &CancellationToken, desired: &RemoteObject) -> ApplyResult {
        let started = Instant::now();
        let resource = self.resource_ref(desired);

        if desired.metadata.name.is_empty() {
            return ApplyResult::failed(
                resource,
                self.config.strategy.nominal_outcome(),
                crate::error::ConvergeError::configuration("desired object has no name"),
                1,
                started.elapsed(),
            );
        }

        let (result, attempts) = self
            .retry
            .execute_counted(cancel, || self.apply_once(&resource, desired))
            .await;

        match result {
            Ok((outcome, applied)) => {
                tracing::info!(
                    resource = %resource,
                    outcome = %outcome,
                    attempts,
                    "apply converged"
                );
                ApplyResult::succeeded(resource, outcome, applied, attempts, started.elapsed())
            }
            Err(error) => {
                tracing::warn!(
                    resource = %resource,
                    strategy = self.config.strategy.name(),
                    attempts,
                    error = %error,
                    "apply failed"
                );
                ApplyResult::failed(
                    resource,
                    self.config.strategy.nominal_outcome(),
                    error,
                    attempts,
                    started.elapsed(),
                )
            }
        }
    }

    /// One un-retried pass of the configured strategy.
    async fn apply_once(
        &self,
        resource: &ResourceRef,
        desired: &RemoteObject,
    ) -> ConvergeResult<(ApplyOutcome, RemoteObject)> {
        match self.config.strategy {
            ApplyStrategy::ServerSideApply => {
                let request = PatchRequest {
                    kind: PatchKind::Apply {
                        field_manager: self.config.field_manager.clone(),
                        force: self.config.force_conflicts,
                    },
                    body: serde_json::to_value(desired)?,
                };
                let applied = self.client.patch(resource, &request).await?;
                Ok((ApplyOutcome::Apply, applied))
            }

            ApplyStrategy::StrategicMerge => match self.client.get(resource).await {
                Err(err) if err.is_not_found() => self.create(resource, desired).await,
                Err(err) => Err(err.into()),
                Ok(existing) => match diff::merge_patch(&existing, desired) {
                    None => {
                        tracing::debug!(resource = %resource, "already converged");
                        Ok((ApplyOutcome::NoOp, existing))
                    }
                    Some(body) => {
                        let request = PatchRequest {
                            kind: PatchKind::Merge,
                            body,
                        };
                        let patched = self.client.patch(resource, &request).await?;
                        Ok((ApplyOutcome::Update, patched))
                    }
                },
            },

            ApplyStrategy::Replace => match self.client.get(resource).await {
                Err(err) if err.is_not_found() => self.create(resource, desired).await,
                Err(err) => Err(err.into()),
                Ok(existing) => {
                    let mut outgoing = desired.clone();
                    // Optimistic-concurrency precondition: carry the existing
                    // version token onto the outgoing write.
                    outgoing.metadata.resource_version =
                        existing.metadata.resource_version.clone();
                    let replaced = self.client.update(resource, &outgoing).await?;
                    Ok((ApplyOutcome::Replace, replaced))
                }
            },
        }
    }

    /// Creates the object, clearing any stale version token first.
    async fn create(
        &self,
        resource: &ResourceRef,
        desired: &RemoteObject,
    ) -> ConvergeResult<(ApplyOutcome, RemoteObject)> {
        let mut outgoing = desired.clone();
        outgoing.metadata.resource_version = None;
        let created = self.client.create(resource, &outgoing).await?;
        Ok((ApplyOutcome::Create, created))
    }

    /// Deletes an object. A not-found response is success: the desired end
    /// state (object absent) already holds.
    ///
    /// # Errors
    /// The terminal client error once retries are exhausted, or
    /// `ConvergeError::Cancelled`.
    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        resource: &ResourceRef,
        opts: &DeleteOptions,
    ) -> ConvergeResult<()> {
        self.retry
            .execute(cancel, || async {
                match self.client.delete(resource, opts).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(resource = %resource, "delete target already absent");
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    /// Issues a low-level patch under the retry executor, returning the
    /// server's resulting object.
    ///
    /// # Errors
    /// The terminal client error once retries are exhausted, or
    /// `ConvergeError::Cancelled`.
    pub async fn patch(
        &self,
        cancel: &CancellationToken,
        resource: &ResourceRef,
        request: &PatchRequest,
    ) -> ConvergeResult<RemoteObject> {
        self.retry
            .execute(cancel, || async {
                Ok(self.client.patch(resource, request).await?)
            })
            .await
    }
}
