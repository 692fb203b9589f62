//! Idempotent execution of mutating requests.
//!
//! Each mutating request carries three identity headers (`Ax-Request-Id`,
//! `Ax-Request-At`, `Ax-Borrower-Id`). Together with the method and the
//! matched route template they form a fingerprint. The
//! [`IdempotencyCoordinator`] claims the fingerprint in a
//! [`CoordinationStore`], runs the handler once, and records its response so
//! that retries are answered from the record instead of re-executing.

pub mod coordinator;
pub mod error;
pub mod identity;
pub mod record;
pub mod store;

pub use coordinator::{Capture, IdempotencyConfig, IdempotencyCoordinator, Outcome};
pub use error::{CoordinationStoreError, IdempotencyError, Result, StoreResult};
pub use identity::{
    BORROWER_ID_HEADER, REQUEST_AT_HEADER, REQUEST_ID_HEADER, RequestIdentity, hash_body,
    is_bypassed,
};
pub use record::{CapturedResponse, IdempotencyRecord};
pub use store::{CoordinationStore, InMemoryCoordinationStore, RedisCoordinationStore};
