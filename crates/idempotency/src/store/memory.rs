use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::CoordinationStore;
use crate::error::{CoordinationStoreError, StoreResult};
use crate::record::IdempotencyRecord;

#[derive(Debug)]
struct Entry {
    record: IdempotencyRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

/// In-memory coordination store for testing and single-process runs.
///
/// Expiry follows tokio's clock, so paused-time tests can advance past a TTL.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    faults: Arc<Faults>,
}

impl InMemoryCoordinationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Returns the number of unexpired records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true if no unexpired record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the remaining TTL of the record under `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_faults(&self) -> StoreResult<()> {
        let latency = *self
            .faults
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationStoreError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn claim_if_absent(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.simulate_faults().await?;

        let now = Instant::now();
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                record: record.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        self.simulate_faults().await?;

        let now = Instant::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.record.clone()))
    }

    async fn set(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> StoreResult<()> {
        self.simulate_faults().await?;

        let expires_at = Instant::now() + ttl;
        self.lock().insert(
            key.to_string(),
            Entry {
                record: record.clone(),
                expires_at,
            },
        );
        Ok(())
    }
}
