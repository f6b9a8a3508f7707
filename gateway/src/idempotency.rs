//! Idempotency key storage with atomic reservation.
//!
//! The store's one non-negotiable property: `reserve` is a single atomic
//! "insert-if-absent, else return existing" step. Two concurrent first-time
//! requests with the same key must not both win the reservation — a plain
//! check-then-write is a correctness bug here, because both callers would
//! proceed to publish.
//!
//! Records expire after a retention window (default 24h). A retry after
//! expiry is treated as a brand-new donation; settlement-level idempotency
//! (per donation id) is the authoritative double-spend guard, this cache is
//! client replay convenience.
//!
//! Two implementations:
//!
//! - [`InMemoryIdempotencyStore`] — single-instance deployments and tests
//! - [`RedisIdempotencyStore`] — shared across gateway instances, using
//!   `SET NX PX` for the atomic reserve

use crate::receipt::Receipt;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from the idempotency store backend.
#[derive(Debug, Error, Clone)]
pub enum IdempotencyError {
    /// The backing store could not be reached; the request should fail
    /// retryable rather than risk a duplicate publish.
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A cached receipt could not be decoded.
    #[error("Corrupt idempotency record: {0}")]
    Corrupt(String),
}

/// Outcome of an atomic reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// This caller owns the key and must publish, then `complete` (or
    /// `abort` on publish failure).
    New,
    /// The key was accepted earlier; here is the cached receipt.
    Existing(Receipt),
    /// Another request holds the reservation but has not completed yet.
    /// The caller should be told to retry shortly.
    InFlight,
}

/// Concurrency-safe idempotency record store.
///
/// Object-safe so the gateway can inject any backend at construction time.
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve `key`, or report who got there first.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the backend is down.
    fn reserve(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Reservation, IdempotencyError>> + Send + '_>>;

    /// Fill a reservation with the receipt to replay. Overwrites only the
    /// caller's own in-flight marker; a completed record never mutates.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the backend is down.
    fn complete(
        &self,
        key: &str,
        receipt: &Receipt,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>>;

    /// Release a reservation after a failed publish, so a client retry with
    /// the same key is free to succeed later.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the backend is down.
    fn abort(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>>;
}

// ───────────────────────────── In-memory ─────────────────────────────

enum Entry {
    InFlight,
    Done { receipt: Receipt, stored_at: DateTime<Utc> },
}

/// In-memory [`IdempotencyStore`] with time-based eviction.
///
/// Suitable for a single gateway instance; run the Redis store when more
/// than one instance serves traffic.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    /// Create a store whose records expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Drop every expired record. Binaries run this on an interval; the
    /// store would otherwise grow without bound.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|_, entry| match entry {
            Entry::InFlight => true,
            Entry::Done { stored_at, .. } => now - *stored_at < self.ttl,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn reserve(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Reservation, IdempotencyError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.lock();
            match entries.get(&key) {
                Some(Entry::InFlight) => Ok(Reservation::InFlight),
                Some(Entry::Done { receipt, stored_at }) => {
                    if Utc::now() - *stored_at < self.ttl {
                        Ok(Reservation::Existing(receipt.clone()))
                    } else {
                        // Expired: the retry is a new donation.
                        entries.insert(key, Entry::InFlight);
                        Ok(Reservation::New)
                    }
                },
                None => {
                    entries.insert(key, Entry::InFlight);
                    Ok(Reservation::New)
                },
            }
        })
    }

    fn complete(
        &self,
        key: &str,
        receipt: &Receipt,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let key = key.to_string();
        let receipt = receipt.clone();
        Box::pin(async move {
            self.lock().insert(
                key,
                Entry::Done {
                    receipt,
                    stored_at: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn abort(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.lock().remove(&key);
            Ok(())
        })
    }
}

// ─────────────────────────────── Redis ───────────────────────────────

/// Marker value stored while a reservation's publish is still in flight.
const IN_FLIGHT_MARKER: &str = "__in_flight__";

/// Redis-backed [`IdempotencyStore`], shared across gateway instances.
///
/// Keys are `idempotency:{key}`; the atomic reserve is `SET NX PX`, so two
/// instances racing on the same key serialize inside Redis.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisIdempotencyStore {
    /// Connect to `redis_url`; records expire after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, IdempotencyError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| IdempotencyError::Unavailable(format!("Failed to create client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| IdempotencyError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self { conn, ttl })
    }

    fn record_key(key: &str) -> String {
        format!("idempotency:{key}")
    }

    fn ttl_millis(&self) -> u64 {
        #[allow(clippy::cast_sign_loss)]
        let millis = self.ttl.num_milliseconds().max(1) as u64;
        millis
    }
}

impl IdempotencyStore for RedisIdempotencyStore {
    fn reserve(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Reservation, IdempotencyError>> + Send + '_>> {
        let record_key = Self::record_key(key);
        Box::pin(async move {
            let mut conn = self.conn.clone();

            // SET NX PX: exactly one concurrent caller wins the reservation.
            let won: bool = redis::cmd("SET")
                .arg(&record_key)
                .arg(IN_FLIGHT_MARKER)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl_millis())
                .query_async(&mut conn)
                .await
                .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;

            if won {
                return Ok(Reservation::New);
            }

            let stored: Option<String> = conn
                .get(&record_key)
                .await
                .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;

            match stored {
                // The winner's record expired or aborted between our SET and
                // GET; treat as in flight and let the client retry.
                None => Ok(Reservation::InFlight),
                Some(value) if value == IN_FLIGHT_MARKER => Ok(Reservation::InFlight),
                Some(value) => {
                    let receipt: Receipt = serde_json::from_str(&value)
                        .map_err(|e| IdempotencyError::Corrupt(e.to_string()))?;
                    Ok(Reservation::Existing(receipt))
                },
            }
        })
    }

    fn complete(
        &self,
        key: &str,
        receipt: &Receipt,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let record_key = Self::record_key(key);
        let receipt = receipt.clone();
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let value = serde_json::to_string(&receipt)
                .map_err(|e| IdempotencyError::Corrupt(e.to_string()))?;
            let _: () = redis::cmd("SET")
                .arg(&record_key)
                .arg(value)
                .arg("PX")
                .arg(self.ttl_millis())
                .query_async(&mut conn)
                .await
                .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }

    fn abort(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let record_key = Self::record_key(key);
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: () = conn
                .del(&record_key)
                .await
                .map_err(|e| IdempotencyError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use crate::receipt::DonationSummary;
    use fundflow_core::{CampaignId, DonationId};
    use rust_decimal::Decimal;

    fn receipt() -> Receipt {
        Receipt {
            success: true,
            message: "Donation received successfully".to_string(),
            donation: DonationSummary {
                donation_id: DonationId::from("DON-1".to_string()),
                campaign_id: CampaignId(1),
                amount: Decimal::new(400, 0),
                currency: "USD".to_string(),
                timestamp: Utc::now(),
            },
            replayed: None,
        }
    }

    #[tokio::test]
    async fn first_reserve_wins_second_sees_in_flight() {
        let store = InMemoryIdempotencyStore::new(Duration::hours(24));
        assert_eq!(store.reserve("k").await.unwrap(), Reservation::New);
        assert_eq!(store.reserve("k").await.unwrap(), Reservation::InFlight);
    }

    #[tokio::test]
    async fn completed_reservation_replays() {
        let store = InMemoryIdempotencyStore::new(Duration::hours(24));
        let receipt = receipt();
        store.reserve("k").await.unwrap();
        store.complete("k", &receipt).await.unwrap();

        match store.reserve("k").await.unwrap() {
            Reservation::Existing(cached) => assert_eq!(cached, receipt),
            other => panic!("expected Existing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborted_reservation_frees_the_key() {
        let store = InMemoryIdempotencyStore::new(Duration::hours(24));
        store.reserve("k").await.unwrap();
        store.abort("k").await.unwrap();
        assert_eq!(store.reserve("k").await.unwrap(), Reservation::New);
    }

    #[tokio::test]
    async fn expired_records_are_treated_as_new() {
        let store = InMemoryIdempotencyStore::new(Duration::zero());
        store.reserve("k").await.unwrap();
        store.complete("k", &receipt()).await.unwrap();
        // TTL of zero: the record is immediately stale.
        assert_eq!(store.reserve("k").await.unwrap(), Reservation::New);
    }

    #[tokio::test]
    async fn sweep_drops_expired_records_only() {
        let store = InMemoryIdempotencyStore::new(Duration::zero());
        store.reserve("expired").await.unwrap();
        store.complete("expired", &receipt()).await.unwrap();
        store.reserve("in-flight").await.unwrap();

        store.sweep();

        // In-flight reservations survive sweeps.
        assert_eq!(store.reserve("in-flight").await.unwrap(), Reservation::InFlight);
        assert_eq!(store.reserve("expired").await.unwrap(), Reservation::New);
    }

    #[tokio::test]
    async fn concurrent_reserves_yield_exactly_one_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::new(Duration::hours(24)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.reserve("k").await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() == Reservation::New {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
