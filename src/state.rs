//! Rate-limit state snapshot (C10), returned by every limiter.
//!
//! Modeled on the teacher's `Decision`/`RateLimitInfo` pair (`decision.rs`),
//! collapsed into a single read-only value per spec.md §3: callers get a
//! boolean admit/deny from `admit`, and can separately ask `state` for a
//! best-effort snapshot without touching storage's write path.

use chrono::{DateTime, Utc};

/// A read-only snapshot of a limiter's state for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    /// The caller-supplied key this state describes.
    pub key: String,
    /// Permits still available before the limiter would deny a request.
    pub remaining_permits: u64,
    /// When the limiter will next be back at full capacity (approximately;
    /// for bucket algorithms this is the time the last-consumed permit
    /// finishes refilling, not a hard deadline).
    pub reset_time: DateTime<Utc>,
    /// Capacity for bucket algorithms, or the configured limit for window
    /// algorithms.
    pub total_permits: u64,
}

impl RateLimitState {
    /// Construct a new snapshot.
    pub fn new(
        key: impl Into<String>,
        remaining_permits: u64,
        reset_time: DateTime<Utc>,
        total_permits: u64,
    ) -> Self {
        Self {
            key: key.into(),
            remaining_permits,
            reset_time,
            total_permits,
        }
    }
}
