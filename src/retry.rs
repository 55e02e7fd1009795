//! Bounded, jittered, cancellable retry execution.
//!
//! The [`RetryExecutor`] runs an async operation under a [`RetryPolicy`]:
//! classified errors are retried with capped exponential backoff plus uniform
//! jitter, and every wait races the computed delay against the caller's
//! cancellation token. The executor is stateless after construction and safe
//! for unbounded concurrent use.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{ConvergeError, ConvergeResult};

/// Pluggable retryability predicate.
///
/// The default delegates to [`ConvergeError::is_retryable`]; hosts with
/// unusual backends can swap in their own classification.
pub type RetryPredicate = Arc<dyn Fn(&ConvergeError) -> bool + Send + Sync>;

/// Backoff and retry-budget configuration. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry, and the floor a negative-jittered delay
    /// is clamped to.
    pub initial_delay: Duration,

    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,

    /// Exponential growth factor per attempt. Must be >= 1.0.
    pub factor: f64,

    /// Fraction of the delay used as the uniform jitter half-width, in
    /// [0.0, 1.0].
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Checks the policy's numeric constraints.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` when the factor is below 1.0,
    /// the jitter fraction is outside [0, 1], a delay is zero, or the delay
    /// bounds are inverted.
    pub fn validate(&self) -> ConvergeResult<()> {
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err(ConvergeError::configuration(format!(
                "retry factor {} must be a finite value >= 1.0",
                self.factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConvergeError::configuration(format!(
                "jitter fraction {} is out of range [0.0, 1.0]",
                self.jitter_fraction
            )));
        }
        if self.initial_delay.is_zero() {
            return Err(ConvergeError::configuration(
                "initial delay must be non-zero",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConvergeError::configuration(
                "max delay must be >= initial delay",
            ));
        }
        Ok(())
    }

    /// The pre-jitter delay for a zero-based attempt index:
    /// `min(initial_delay * factor^attempt, max_delay)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let grown = self.initial_delay.as_secs_f64() * self.factor.powi(attempt.min(64) as i32);
        let capped = grown.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// The jittered delay for a zero-based attempt index.
    ///
    /// Adds a uniformly random offset in `[-d * jf, +d * jf]` to the base
    /// delay `d`. Never negative: a jittered value that would drop to or
    /// below zero is floored at `initial_delay` to avoid hot-looping.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_fraction == 0.0 {
            return base;
        }

        let half_width = base.as_secs_f64() * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-half_width..=half_width);
        let jittered = base.as_secs_f64() + offset;
        if jittered <= 0.0 {
            self.initial_delay
        } else {
            Duration::from_secs_f64(jittered)
        }
    }
}

/// Runs operations under a retry policy.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor with the default retryability classification.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` if the policy is invalid.
    pub fn new(policy: RetryPolicy) -> ConvergeResult<Self> {
        Self::with_predicate(policy, Arc::new(ConvergeError::is_retryable))
    }

    /// Creates an executor with a custom retryability predicate.
    ///
    /// # Errors
    /// Returns `ConvergeError::Configuration` if the policy is invalid.
    pub fn with_predicate(policy: RetryPolicy, retryable: RetryPredicate) -> ConvergeResult<Self> {
        policy.validate()?;
        Ok(Self { policy, retryable })
    }

    /// Returns the configured policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, exhausts the retry budget, fails with a
    /// non-retryable error, or the token is cancelled mid-wait.
    ///
    /// # Errors
    /// The last operation error once retries are exhausted or the error is
    /// classified non-retryable, or `ConvergeError::Cancelled` if the token
    /// fires during a backoff wait.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> ConvergeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConvergeResult<T>>,
    {
        self.execute_counted(cancel, op).await.0
    }

    /// Like [`execute`](Self::execute), additionally reporting the number of
    /// attempts made (always >= 1).
    pub async fn execute_counted<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> (ConvergeResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConvergeResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "operation succeeded after retries");
                    }
                    return (Ok(value), attempt + 1);
                }
                Err(err) => {
                    if attempt >= self.policy.max_retries {
                        tracing::warn!(
                            attempts = attempt + 1,
                            error = %err,
                            "retry budget exhausted"
                        );
                        return (Err(err), attempt + 1);
                    }
                    if !(self.retryable)(&err) {
                        tracing::debug!(error = %err, "error not retryable, giving up");
                        return (Err(err), attempt + 1);
                    }

                    let delay = self.policy.jittered_delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            tracing::debug!(attempts = attempt + 1, "cancelled during backoff wait");
                            return (Err(ConvergeError::Cancelled), attempt + 1);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
