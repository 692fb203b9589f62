//! Claim, execute, and finalize a fingerprinted request.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::error::{CoordinationStoreError, IdempotencyError, Result, StoreResult};
use crate::identity::{RequestIdentity, hash_body};
use crate::record::{CapturedResponse, IdempotencyRecord};
use crate::store::CoordinationStore;

/// Coordinator timing settings.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a finalized record is retained.
    pub ttl: Duration,
    /// How long a claim lives before the handler's outcome is recorded.
    pub provisional_ttl: Duration,
    /// Deadline for each coordination store round trip before the handler runs.
    pub claim_timeout: Duration,
    /// Allowed distance between the request timestamp and server time.
    pub max_clock_skew: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            provisional_ttl: Duration::from_secs(60),
            claim_timeout: Duration::from_secs(2),
            max_clock_skew: Duration::from_secs(10 * 60),
        }
    }
}

/// A handler output whose status and body can be recorded.
pub trait Capture {
    fn capture(&self) -> CapturedResponse;
}

impl Capture for CapturedResponse {
    fn capture(&self) -> CapturedResponse {
        self.clone()
    }
}

/// What the coordinator did with a request.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The handler ran and produced this output.
    Executed(T),
    /// An earlier outcome was found and must be sent back verbatim.
    Replayed(CapturedResponse),
}

/// Guarantees at most one handler execution per request fingerprint.
///
/// A request first claims its fingerprint with a provisional record. The
/// winner runs the handler and overwrites the record with the captured
/// response. Anyone else is answered from the stored record: a replay if it
/// is final, a conflict if it is still provisional or the body differs.
///
/// If a handler outlives the provisional TTL the claim lapses and a retry may
/// run the handler a second time.
#[derive(Clone)]
pub struct IdempotencyCoordinator<C> {
    store: C,
    config: IdempotencyConfig,
}

impl<C> IdempotencyCoordinator<C>
where
    C: CoordinationStore + Clone + 'static,
{
    pub fn new(store: C, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Validates the identity headers against the current server time.
    pub fn identify(
        &self,
        request_id: Option<&str>,
        request_at: Option<&str>,
        borrower_id: Option<&str>,
    ) -> Result<RequestIdentity> {
        RequestIdentity::parse(
            request_id,
            request_at,
            borrower_id,
            Utc::now(),
            self.config.max_clock_skew,
        )
    }

    /// Runs `handler` at most once for this request's fingerprint.
    ///
    /// Once the claim succeeds the handler and the finalize step run on their
    /// own task, so dropping the returned future does not abort them.
    #[tracing::instrument(skip_all, fields(fingerprint))]
    pub async fn execute<F, Fut, T>(
        &self,
        method: &str,
        route: &str,
        identity: &RequestIdentity,
        body: &[u8],
        handler: F,
    ) -> Result<Outcome<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Capture + Send + 'static,
    {
        let key = identity.fingerprint(method, route);
        tracing::Span::current().record("fingerprint", key.as_str());

        let body_hash = hash_body(body);
        let provisional = IdempotencyRecord::provisional(identity, body_hash.clone(), Utc::now());

        let claimed = self
            .bounded(self.store.claim_if_absent(
                &key,
                &provisional,
                self.config.provisional_ttl,
            ))
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "idempotency claim failed");
                metrics::counter!("idempotency_claims_total", "outcome" => "unavailable")
                    .increment(1);
                IdempotencyError::StoreUnavailable(err)
            })?;

        if !claimed {
            metrics::counter!("idempotency_claims_total", "outcome" => "duplicate").increment(1);
            return self.resolve_duplicate(&key, &body_hash).await;
        }
        metrics::counter!("idempotency_claims_total", "outcome" => "claimed").increment(1);

        let store = self.store.clone();
        let ttl = self.config.ttl;
        let deadline = self.config.claim_timeout;
        let task = tokio::spawn(async move {
            let output = handler().await;
            let captured = output.capture();
            let status = captured.status;
            let record = provisional.finalize(captured, Utc::now());

            // The response is still delivered; the claim lapses after the provisional TTL.
            let finalized = tokio::time::timeout(deadline, store.set(&key, &record, ttl))
                .await
                .unwrap_or(Err(CoordinationStoreError::Timeout(deadline)));
            if let Err(err) = finalized {
                tracing::warn!(
                    error = %err,
                    fingerprint = %key,
                    "failed to finalize idempotency record"
                );
            } else {
                tracing::debug!(fingerprint = %key, status, "idempotency record finalized");
            }
            output
        });

        task.await
            .map(Outcome::Executed)
            .map_err(|err| IdempotencyError::HandlerFailed(err.to_string()))
    }

    async fn resolve_duplicate<T>(&self, key: &str, body_hash: &str) -> Result<Outcome<T>> {
        let existing = self
            .bounded(self.store.get(key))
            .await
            .map_err(IdempotencyError::StoreUnavailable)?;

        let Some(record) = existing else {
            // Expired between the failed claim and this load.
            return Err(in_progress());
        };

        if record.body_hash != body_hash {
            metrics::counter!("idempotency_conflicts_total", "reason" => "payload_mismatch")
                .increment(1);
            return Err(IdempotencyError::PayloadMismatch);
        }

        match record.replayable() {
            Some(response) => {
                metrics::counter!("idempotency_replays_total").increment(1);
                tracing::info!(status = response.status, "replaying stored response");
                Ok(Outcome::Replayed(response))
            }
            None => Err(in_progress()),
        }
    }

    async fn bounded<V>(&self, call: impl Future<Output = StoreResult<V>>) -> StoreResult<V> {
        tokio::time::timeout(self.config.claim_timeout, call)
            .await
            .unwrap_or(Err(CoordinationStoreError::Timeout(self.config.claim_timeout)))
    }
}

fn in_progress() -> IdempotencyError {
    metrics::counter!("idempotency_conflicts_total", "reason" => "in_progress").increment(1);
    IdempotencyError::InProgress
}
