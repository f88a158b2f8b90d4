//! Sliding window (C8): precise rolling-window counter limiter.
//!
//! spec.md §4.5 wants an exact rolling count over `(now − window, now]`
//! from an ordered list of `(timestamp, count)` records — not the
//! teacher's weighted-previous-window approximation in
//! `algorithm::sliding_window::SlidingWindow`. That approximation has no
//! counterpart here; this is grounded instead on the teacher's
//! `algorithm::sliding_log::SlidingLog`, which already stores and prunes a
//! timestamp list, generalized from one-timestamp-per-request to
//! `(timestamp, count)` entries so a single admit can consume more than one
//! permit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::algorithm::Algorithm;
use crate::error::Result;
use crate::state::RateLimitState;
use crate::storage::Storage;
use crate::util::now;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    timestamp: DateTime<Utc>,
    count: u64,
}

/// Precise rolling-window counter limiter.
///
/// Parameters: `limit` (integer, > 0) and `window` (duration, > 0). Retains
/// entries for 2x `window` so late `state(·)` reads still see recent
/// history, but admission arithmetic only ever looks at `(now − window,
/// now]`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u64,
    window: Duration,
}

impl SlidingWindow {
    /// Construct with the given limit and window length.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    async fn load<S: Storage>(&self, storage: &S, storage_key: &str) -> Result<Vec<Entry>> {
        let raw = storage.get(storage_key).await?;
        Ok(raw
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(entries) => Some(entries),
                Err(err) => {
                    warn!(key = storage_key, error = %err, "sliding window state unreadable, treating as cold");
                    None
                }
            })
            .unwrap_or_default())
    }

    async fn store<S: Storage>(&self, storage: &S, storage_key: &str, entries: &[Entry]) -> Result<()> {
        let json = serde_json::to_string(entries).expect("sliding window entries always serialize");
        storage.set(storage_key, json, Some(self.window * 2)).await
    }

    fn within_admission_window(&self, entries: &[Entry], at: DateTime<Utc>) -> Vec<Entry> {
        let cutoff = at - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        entries.iter().filter(|e| e.timestamp >= cutoff).cloned().collect()
    }

    fn prune_retained(&self, entries: Vec<Entry>, at: DateTime<Utc>) -> Vec<Entry> {
        let retention = self.window * 2;
        let cutoff = at - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        entries.into_iter().filter(|e| e.timestamp >= cutoff).collect()
    }
}

impl Algorithm for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn admit<S: Storage>(&self, storage: &S, storage_key: &str, permits: u64) -> Result<bool> {
        let at = now();
        let stored = self.load(storage, storage_key).await?;
        let in_window = self.within_admission_window(&stored, at);
        let current: u64 = in_window.iter().map(|e| e.count).sum();

        let admitted = current + permits <= self.limit;
        let mut retained = self.prune_retained(stored, at);

        if admitted {
            retained.push(Entry {
                timestamp: at,
                count: permits,
            });
        }

        self.store(storage, storage_key, &retained).await?;
        Ok(admitted)
    }

    async fn state<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        caller_key: &str,
    ) -> Result<Option<RateLimitState>> {
        let at = now();
        let stored = self.load(storage, storage_key).await?;
        if stored.is_empty() {
            return Ok(None);
        }

        let in_window = self.within_admission_window(&stored, at);
        let current: u64 = in_window.iter().map(|e| e.count).sum();
        let remaining = self.limit.saturating_sub(current);

        let oldest = in_window
            .iter()
            .map(|e| e.timestamp)
            .min()
            .unwrap_or(at);
        let reset_time = oldest + chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());

        Ok(Some(RateLimitState::new(caller_key, remaining, reset_time, self.limit)))
    }
}
