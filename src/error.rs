//! Error types for converge.
//!
//! All errors are strongly typed using thiserror. Remote failures carry a
//! fixed classification (`ErrorKind`) that drives the retry policy and the
//! idempotent-delete rule; everything the engines do downstream of a remote
//! call pattern-matches on that classification rather than on message text.

use thiserror::Error;

/// Classification of a remote-call failure.
///
/// Every error surfaced by a [`crate::client::ResourceClient`] must map to
/// exactly one of these kinds. The retry predicate and the delete-idempotency
/// rule consume this classification; a backend that cannot provide it cannot
/// back the engine correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The target object does not exist.
    NotFound,

    /// Optimistic-concurrency conflict (stale version token).
    Conflict,

    /// The request was malformed or semantically invalid.
    Invalid,

    /// The caller is authenticated but not permitted.
    Forbidden,

    /// The caller is not authenticated.
    Unauthorized,

    /// The remote side timed out.
    Timeout,

    /// The remote service is temporarily unavailable.
    Unavailable,

    /// The caller is being rate-limited.
    TooManyRequests,

    /// Generic internal/server error.
    Internal,
}

impl ErrorKind {
    /// Default retryability classification.
    ///
    /// Transient conditions (conflict, timeout, unavailable, rate-limited,
    /// internal) are retryable; request errors (invalid, unauthorized,
    /// forbidden, not-found) are not — retrying cannot change them.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Conflict
                | Self::Timeout
                | Self::Unavailable
                | Self::TooManyRequests
                | Self::Internal
        )
    }

    /// Returns a short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::TooManyRequests => "too_many_requests",
            Self::Internal => "internal",
        }
    }
}

/// A classified error returned by a remote resource client.
#[derive(Debug, Clone, Error)]
#[error("{} error: {message}", kind.name())]
pub struct ClientError {
    /// The fixed classification of this failure.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ClientError {
    /// Creates a classified client error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Shorthand for an `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    /// Shorthand for an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Returns true if this error is a `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }
}

/// Top-level error type for converge.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// A classified failure from the injected remote resource client.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid engine or policy configuration. Never retried — retrying a
    /// programming error cannot help.
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A resolver strategy was invoked without a required input object.
    #[error("missing {side} object: required by the {strategy} strategy")]
    MissingObject {
        /// Which side is missing ("control-plane" or "downstream").
        side: &'static str,
        /// The strategy that required it.
        strategy: &'static str,
    },

    /// The caller's cancellation token fired while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Failed to serialize an object into a patch payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvergeError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns the remote-call classification, if this is a client error.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Client(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Returns true if this is a classified client error.
    #[must_use]
    pub const fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    /// Returns true if this error is a `NotFound` client error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Client(ClientError {
                kind: ErrorKind::NotFound,
                ..
            })
        )
    }

    /// Returns true if this error is retryable under the default policy.
    ///
    /// Only transient client errors qualify. Configuration errors, missing
    /// resolver inputs, cancellation, and serialization failures are logic or
    /// terminal conditions that a retry cannot fix.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Client(e) => e.kind.is_retryable(),
            Self::Configuration { .. }
            | Self::MissingObject { .. }
            | Self::Cancelled
            | Self::Serialization(_) => false,
        }
    }
}

/// Result type alias for converge operations.
pub type ConvergeResult<T> = Result<T, ConvergeError>;
