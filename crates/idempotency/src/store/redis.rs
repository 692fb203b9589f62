use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use super::{CoordinationStore, ttl_millis};
use crate::error::StoreResult;
use crate::record::IdempotencyRecord;

/// Redis-backed coordination store.
///
/// Claims use `SET key value NX PX ttl`, so the existence check and the write
/// are a single atomic command on the server.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    manager: ConnectionManager,
}

impl RedisCoordinationStore {
    /// Wraps an existing connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Connects to the Redis server at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn claim_if_absent(
        &self,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.manager.clone();

        // SET NX replies OK on success and nil if the key exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await?;

        Ok(raw
            .map(|payload| serde_json::from_str(&payload))
            .transpose()?)
    }

    async fn set(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> StoreResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.manager.clone();

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}
