//! Token bucket (C5): continuous-refill burst limiter.
//!
//! Grounded on the teacher's `algorithm::token_bucket::TokenBucket`, with
//! the read-modify-write moved from the teacher's `execute_atomic` closure
//! abstraction onto plain `get`/`set` calls — correctness here comes from
//! the caller (`Policy::admit`) holding the per-key section for the
//! duration of the call, not from a storage-level transaction primitive.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::algorithm::{seconds_between, seconds_to_duration, Algorithm, RATE_EPSILON};
use crate::error::Result;
use crate::state::RateLimitState;
use crate::storage::Storage;
use crate::util::now;

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    tokens: String,
    last_refill: DateTime<Utc>,
}

/// Continuous-refill burst limiter.
///
/// Parameters: `capacity` (real, > 0) and `refill_rate` (tokens/sec, ≥ 0).
/// A `refill_rate` of 0 makes the bucket a one-shot quota that never
/// refills.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    ttl: Duration,
}

impl TokenBucket {
    /// Construct with the given capacity, refill rate and inactivity TTL.
    pub fn new(capacity: f64, refill_rate: f64, ttl: Duration) -> Self {
        Self {
            capacity,
            refill_rate,
            ttl,
        }
    }

    fn recalculate(&self, record: Option<Record>, at: DateTime<Utc>) -> (f64, DateTime<Utc>) {
        match record {
            None => (self.capacity, at),
            Some(r) => {
                let tokens: f64 = r.tokens.parse().unwrap_or(self.capacity);
                let elapsed = seconds_between(r.last_refill, at);
                let refilled = (tokens + elapsed * self.refill_rate).min(self.capacity);
                (refilled, at)
            }
        }
    }

    async fn load<S: Storage>(&self, storage: &S, storage_key: &str) -> Result<Option<Record>> {
        let raw = storage.get(storage_key).await?;
        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key = storage_key, error = %err, "token bucket state unreadable, treating as cold");
                None
            }
        }))
    }

    async fn store<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        tokens: f64,
        last_refill: DateTime<Utc>,
    ) -> Result<()> {
        let record = Record {
            tokens: tokens.to_string(),
            last_refill,
        };
        let json = serde_json::to_string(&record).expect("token bucket record always serializes");
        storage.set(storage_key, json, Some(self.ttl)).await
    }
}

impl Algorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn admit<S: Storage>(&self, storage: &S, storage_key: &str, permits: u64) -> Result<bool> {
        let at = now();
        let prior = self.load(storage, storage_key).await?;
        let (mut tokens, last_refill) = self.recalculate(prior, at);

        let admitted = tokens >= permits as f64;
        if admitted {
            tokens -= permits as f64;
        }

        self.store(storage, storage_key, tokens, last_refill).await?;
        Ok(admitted)
    }

    async fn state<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        caller_key: &str,
    ) -> Result<Option<RateLimitState>> {
        let prior = self.load(storage, storage_key).await?;
        let Some(record) = prior else {
            return Ok(None);
        };

        let at = now();
        let (tokens, last_refill) = self.recalculate(Some(record), at);
        let remaining = tokens.floor().max(0.0) as u64;
        let rate = self.refill_rate.max(RATE_EPSILON);
        let reset_time = last_refill + seconds_to_duration((self.capacity - tokens) / rate);

        Ok(Some(RateLimitState::new(
            caller_key,
            remaining,
            reset_time,
            self.capacity.round() as u64,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn admits_up_to_capacity_then_denies() {
        let bucket = TokenBucket::new(5.0, 0.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();

        for i in 1..=5 {
            assert!(
                bucket.admit(&storage, "tokenbucket:p:user:1", 1).await.unwrap(),
                "admit {i} should succeed"
            );
        }
        assert!(!bucket.admit(&storage, "tokenbucket:p:user:1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(1.0, 10.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();

        assert!(bucket.admit(&storage, "k", 1).await.unwrap());
        assert!(!bucket.admit(&storage, "k", 1).await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bucket.admit(&storage, "k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn a_request_larger_than_capacity_is_always_denied() {
        let bucket = TokenBucket::new(5.0, 1.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();
        assert!(!bucket.admit(&storage, "k", 6).await.unwrap());
    }

    #[tokio::test]
    async fn state_reflects_refill_without_consuming() {
        let bucket = TokenBucket::new(5.0, 1.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();

        bucket.admit(&storage, "k", 5).await.unwrap();
        let snapshot = bucket.state(&storage, "k", "user:1").await.unwrap().unwrap();
        assert_eq!(snapshot.key, "user:1");
        assert_eq!(snapshot.total_permits, 5);
        assert_eq!(snapshot.remaining_permits, 0);

        // state() must not consume tokens.
        let snapshot_again = bucket.state(&storage, "k", "user:1").await.unwrap().unwrap();
        assert_eq!(snapshot_again.remaining_permits, 0);
    }

    #[tokio::test]
    async fn cold_key_has_no_state() {
        let bucket = TokenBucket::new(5.0, 1.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();
        assert!(bucket.state(&storage, "absent", "user:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exactly_at_capacity_ties_toward_admit() {
        let bucket = TokenBucket::new(5.0, 0.0, Duration::from_secs(300));
        let storage = MemoryStorage::new();
        assert!(bucket.admit(&storage, "k", 5).await.unwrap());
    }
}
