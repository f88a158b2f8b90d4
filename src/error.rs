//! Error types for the rate limiting policy engine.
//!
//! The taxonomy follows the failure kinds the core promises callers: bad
//! input, out-of-range configuration, caller-initiated cancellation, and an
//! unreachable/unavailable storage backend. Malformed-but-present stored
//! state is deliberately *not* a variant here — it is recovered internally
//! (the key is treated as cold) and never reaches the caller.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Top-level error returned by limiters, storage backends, and the policy
/// factory.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Empty/blank key or name, permits < 1, unknown algorithm, missing
    /// config field, or a config value that could not be converted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A numeric configuration value is outside its valid domain (capacity
    /// <= 0, rate < 0, window <= 0, required-positive TTL <= 0).
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The caller's deadline elapsed while waiting on the per-key section
    /// or a storage round-trip. No permits were consumed.
    #[error("operation cancelled")]
    Cancelled,

    /// The storage backend could not satisfy the operation (connection
    /// failure, remote error, pool exhaustion). Limiters fail closed on
    /// this error unless a policy was explicitly configured to fail open.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

impl RateLimitError {
    /// Build an [`RateLimitError::InvalidArgument`] from a display value.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build an [`RateLimitError::OutOfRange`] from a display value.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange(message.into())
    }

    /// True if retrying the same call without changing arguments might
    /// succeed (i.e. this was a transient storage failure).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(e) if e.is_retryable())
    }
}

/// Storage-backend-level errors: connectivity and operational failures.
///
/// Deserialization failures of algorithm state are *not* represented here;
/// they are handled at the call site by treating the key as cold
/// (spec: storage-corrupt is self-healing, not an error kind).
#[derive(Debug, Error)]
pub enum StorageError {
    /// A generic operation failed; `retryable` hints whether a retry might
    /// succeed (e.g. a timed-out round trip vs. a malformed URL).
    #[error("{message}")]
    OperationFailed {
        /// Human-readable description of the failure.
        message: String,
        /// Whether the caller may reasonably retry.
        retryable: bool,
    },

    /// Failed to establish or re-establish a backend connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection pool had no connections available within budget.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A key argument was empty or blank.
    #[error("invalid key")]
    InvalidKey,
}

impl StorageError {
    /// Build an [`StorageError::OperationFailed`].
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Whether retrying the failed operation might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::ConnectionFailed(_) => true,
            Self::PoolExhausted => true,
            Self::InvalidKey => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_retryable() {
        assert!(StorageError::operation_failed("timeout", true).is_retryable());
        assert!(!StorageError::operation_failed("bad request", false).is_retryable());
        assert!(StorageError::PoolExhausted.is_retryable());
        assert!(!StorageError::InvalidKey.is_retryable());
    }

    #[test]
    fn rate_limit_error_retryable_propagates_from_storage() {
        let err: RateLimitError = StorageError::PoolExhausted.into();
        assert!(err.is_retryable());

        let err = RateLimitError::invalid_argument("empty key");
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = RateLimitError::invalid_argument("permits must be >= 1");
        assert_eq!(err.to_string(), "invalid argument: permits must be >= 1");

        let err = RateLimitError::Cancelled;
        assert_eq!(err.to_string(), "operation cancelled");
    }
}
