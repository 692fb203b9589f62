//! Idempotency error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a coordination store backend.
#[derive(Debug, Error)]
pub enum CoordinationStoreError {
    /// The backend refused or could not serve the call.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish before its deadline.
    #[error("coordination store call timed out after {0:?}")]
    Timeout(Duration),

    /// A Redis error occurred.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that stop a mutating request before or instead of its handler.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// A required identity header is absent or blank.
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// An identity header is present but malformed.
    #[error("{header} {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: &'static str,
    },

    /// The request timestamp is too far from server time.
    #[error("{header} is outside the allowed clock skew of {max_skew_secs}s")]
    ClockSkew {
        header: &'static str,
        max_skew_secs: u64,
    },

    /// The fingerprint was already claimed by a request with another body.
    #[error("idempotency key re-used with different body")]
    PayloadMismatch,

    /// The fingerprint is claimed and its outcome is not recorded yet.
    #[error("idempotent request in progress")]
    InProgress,

    /// The coordination store could not be reached.
    #[error("idempotency store unavailable")]
    StoreUnavailable(#[source] CoordinationStoreError),

    /// The handler task panicked or was aborted.
    #[error("request handler failed: {0}")]
    HandlerFailed(String),
}

impl IdempotencyError {
    /// Returns true if the caller sent a malformed or stale identity.
    pub fn is_client_input(&self) -> bool {
        matches!(
            self,
            IdempotencyError::MissingHeader(_)
                | IdempotencyError::InvalidHeader { .. }
                | IdempotencyError::ClockSkew { .. }
        )
    }

    /// Returns true if the request conflicts with an earlier one.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            IdempotencyError::PayloadMismatch | IdempotencyError::InProgress
        )
    }
}

/// Result type for coordination store operations.
pub type StoreResult<T> = std::result::Result<T, CoordinationStoreError>;

/// Result type for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
