//! Key-value coordination stores.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::InMemoryCoordinationStore;
pub use self::redis::RedisCoordinationStore;

use crate::error::StoreResult;
use crate::record::IdempotencyRecord;

/// Atomic set-if-absent storage for idempotency records.
///
/// Every write carries a TTL; records are never deleted explicitly.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Stores `record` under `key` only if the key is absent.
    ///
    /// Returns true if this call created the key.
    async fn claim_if_absent(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Loads the record under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    /// Overwrites the record under `key`.
    async fn set(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> StoreResult<()>;
}

/// Converts a TTL to whole milliseconds, never less than one.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
