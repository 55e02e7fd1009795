//! Bounded-concurrency batch apply.
//!
//! Every item gets its own task; a semaphore caps how many run their remote
//! calls at once. Item failures are values inside [`BatchResult`], never
//! reasons to abort siblings, and results come back in input order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::ConvergeError;
use crate::object::RemoteObject;
use crate::outcome::{ApplyResult, BatchResult};

use super::ApplyEngine;

impl ApplyEngine {
    /// Converges a batch of objects with at most `max_concurrency` in flight.
    ///
    /// A `max_concurrency` of zero selects the configured default. Items that
    /// never obtain a permit before cancellation fires are reported as failed
    /// with `ConvergeError::Cancelled`; items already past the permit run to
    /// completion of their current attempt.
    pub async fn apply_batch(
        &self,
        cancel: &CancellationToken,
        desired: Vec<RemoteObject>,
        max_concurrency: usize,
    ) -> BatchResult {
        let started = Instant::now();
        if desired.is_empty() {
            return BatchResult::default();
        }

        let limit = if max_concurrency == 0 {
            self.config().default_batch_concurrency
        } else {
            max_concurrency
        };
        tracing::debug!(items = desired.len(), limit, "starting batch apply");

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(desired.len());

        for object in desired {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let resource = self.resource_ref(&object);

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => engine.apply(&cancel, &object).await,
                    None => ApplyResult::failed(
                        engine.resource_ref(&object),
                        engine.config().strategy.nominal_outcome(),
                        ConvergeError::Cancelled,
                        1,
                        Duration::ZERO,
                    ),
                }
            });
            handles.push((resource, handle));
        }

        // Awaiting handles in spawn order keeps results in input order.
        let mut results = Vec::with_capacity(handles.len());
        for (resource, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    tracing::error!(resource = %resource, error = %join_err, "apply task panicked");
                    results.push(ApplyResult::failed(
                        resource,
                        self.config().strategy.nominal_outcome(),
                        ConvergeError::configuration(format!("apply task failed: {join_err}")),
                        1,
                        Duration::ZERO,
                    ));
                }
            }
        }

        let batch = BatchResult::from_results(results, started.elapsed());
        tracing::info!(
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed,
            "batch apply finished"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::client::{
        DeleteOptions, ListOptions, MemoryClient, PatchRequest, ResourceClient,
    };
    use crate::error::ClientError;
    use crate::reference::ResourceRef;

    use super::super::EngineConfig;
    use super::*;
    use crate::retry::RetryPolicy;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
            jitter_fraction: 0.0,
        }
    }

    fn engine(client: Arc<dyn ResourceClient>) -> ApplyEngine {
        ApplyEngine::new(client, EngineConfig::default(), quick_policy()).unwrap()
    }

    fn widgets(n: usize) -> Vec<RemoteObject> {
        (0..n)
            .map(|i| {
                RemoteObject::new("apps/v1", "Widget", format!("w{i}"))
                    .with_namespace("prod")
                    .with_spec(json!({"replicas": i}))
            })
            .collect()
    }

    /// Wraps a memory client and tracks how many calls are in flight.
    struct CountingClient {
        inner: MemoryClient,
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                inner: MemoryClient::new(),
                in_flight: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            }
        }

        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ResourceClient for CountingClient {
        async fn get(&self, resource: &ResourceRef) -> Result<RemoteObject, ClientError> {
            self.enter();
            // Hold the slot long enough for sibling tasks to overlap if the
            // limiter lets them.
            tokio::time::sleep(Duration::from_millis(5)).await;
            let out = self.inner.get(resource).await;
            self.exit();
            out
        }

        async fn list(
            &self,
            resource: &ResourceRef,
            opts: &ListOptions,
        ) -> Result<Vec<RemoteObject>, ClientError> {
            self.inner.list(resource, opts).await
        }

        async fn create(
            &self,
            resource: &ResourceRef,
            object: &RemoteObject,
        ) -> Result<RemoteObject, ClientError> {
            self.enter();
            tokio::time::sleep(Duration::from_millis(5)).await;
            let out = self.inner.create(resource, object).await;
            self.exit();
            out
        }

        async fn update(
            &self,
            resource: &ResourceRef,
            object: &RemoteObject,
        ) -> Result<RemoteObject, ClientError> {
            self.inner.update(resource, object).await
        }

        async fn patch(
            &self,
            resource: &ResourceRef,
            request: &PatchRequest,
        ) -> Result<RemoteObject, ClientError> {
            self.inner.patch(resource, request).await
        }

        async fn delete(
            &self,
            resource: &ResourceRef,
            opts: &DeleteOptions,
        ) -> Result<(), ClientError> {
            self.inner.delete(resource, opts).await
        }
    }

    #[tokio::test]
    async fn test_empty_batch_returns_zero_value() {
        let engine = engine(Arc::new(MemoryClient::new()));
        let batch = engine
            .apply_batch(&CancellationToken::new(), Vec::new(), 4)
            .await;
        assert_eq!(batch.total, 0);
        assert_eq!(batch.succeeded, 0);
        assert_eq!(batch.failed, 0);
        assert!(batch.results.is_empty());
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order_and_tallies() {
        let engine = engine(Arc::new(MemoryClient::new()));
        let batch = engine
            .apply_batch(&CancellationToken::new(), widgets(5), 3)
            .await;

        assert_eq!(batch.total, 5);
        assert_eq!(batch.succeeded, 5);
        assert_eq!(batch.failed, 0);
        assert_eq!(batch.results.len(), 5);
        for (i, result) in batch.results.iter().enumerate() {
            assert_eq!(result.resource.name, format!("w{i}"));
        }
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort_siblings() {
        let client = Arc::new(MemoryClient::new());
        let engine = engine(client);
        let mut items = widgets(3);
        // A nameless object fails configuration validation.
        items.insert(1, RemoteObject::new("apps/v1", "Widget", ""));

        let batch = engine
            .apply_batch(&CancellationToken::new(), items, 2)
            .await;
        assert_eq!(batch.total, 4);
        assert_eq!(batch.succeeded, 3);
        assert_eq!(batch.failed, 1);
        assert!(!batch.results[1].success);
        assert!(batch.results[0].success);
        assert!(batch.results[2].success);
        assert!(batch.results[3].success);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let client = Arc::new(CountingClient::new());
        let engine = engine(client.clone());

        let batch = engine
            .apply_batch(&CancellationToken::new(), widgets(6), 1)
            .await;
        assert!(batch.all_succeeded());
        assert_eq!(client.max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_uses_configured_default() {
        let client = Arc::new(CountingClient::new());
        let config = EngineConfig {
            default_batch_concurrency: 2,
            ..EngineConfig::default()
        };
        let engine = ApplyEngine::new(client.clone(), config, quick_policy()).unwrap();

        let batch = engine
            .apply_batch(&CancellationToken::new(), widgets(6), 0)
            .await;
        assert!(batch.all_succeeded());
        assert!(client.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pre_cancelled_batch_fails_every_item() {
        let engine = engine(Arc::new(MemoryClient::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = engine.apply_batch(&cancel, widgets(3), 2).await;
        assert_eq!(batch.total, 3);
        assert_eq!(batch.failed, 3);
        for result in &batch.results {
            assert!(matches!(result.error, Some(ConvergeError::Cancelled)));
        }
    }

    // Needs a stub with interior mutability to flip failures per call.
    struct FailSecondClient {
        inner: MemoryClient,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ResourceClient for FailSecondClient {
        async fn get(&self, resource: &ResourceRef) -> Result<RemoteObject, ClientError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if resource.name == "w1" && call <= 10 {
                return Err(ClientError::new(
                    crate::error::ErrorKind::Forbidden,
                    "injected",
                ));
            }
            self.inner.get(resource).await
        }

        async fn list(
            &self,
            resource: &ResourceRef,
            opts: &ListOptions,
        ) -> Result<Vec<RemoteObject>, ClientError> {
            self.inner.list(resource, opts).await
        }

        async fn create(
            &self,
            resource: &ResourceRef,
            object: &RemoteObject,
        ) -> Result<RemoteObject, ClientError> {
            self.inner.create(resource, object).await
        }

        async fn update(
            &self,
            resource: &ResourceRef,
            object: &RemoteObject,
        ) -> Result<RemoteObject, ClientError> {
            self.inner.update(resource, object).await
        }

        async fn patch(
            &self,
            resource: &ResourceRef,
            request: &PatchRequest,
        ) -> Result<RemoteObject, ClientError> {
            self.inner.patch(resource, request).await
        }

        async fn delete(
            &self,
            resource: &ResourceRef,
            opts: &DeleteOptions,
        ) -> Result<(), ClientError> {
            self.inner.delete(resource, opts).await
        }
    }

    #[tokio::test]
    async fn test_remote_failure_is_isolated_to_its_item() {
        let client = Arc::new(FailSecondClient {
            inner: MemoryClient::new(),
            calls: Mutex::new(0),
        });
        let engine = engine(client);

        let batch = engine
            .apply_batch(&CancellationToken::new(), widgets(3), 1)
            .await;
        assert_eq!(batch.total, 3);
        assert_eq!(batch.failed, 1);
        assert!(!batch.results[1].success);
        assert!(batch.results[0].success);
        assert!(batch.results[2].success);
    }
}
