//! Rate limiting algorithms (C5–C8) and the contract they share.
//!
//! Modeled on the teacher's `Algorithm` trait (one method per operation,
//! generic over the storage backend so call sites monomorphize rather than
//! pay for dynamic dispatch), narrowed to the two operations spec.md §4.1
//! actually names: `admit` and `state`. The teacher's `check`/`check_and_record`
//! split, its `Decision`/`RateLimitInfo` types, and its response-header
//! projections belong to the HTTP-facing layer this crate does not carry;
//! [`crate::state::RateLimitState`] is the one snapshot type every limiter
//! returns.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::state::RateLimitState;
use crate::storage::Storage;

/// A rate limiting algorithm's admission logic over a storage-keyed record.
///
/// `storage_key` is the fully-qualified key the caller (the policy, via
/// [`crate::policy::Policy`]) has already derived per spec.md §6
/// (`<algorithm>:<policy-name>:<caller-key>`); algorithms that subdivide
/// that key further (fixed window appends a window-id) do so internally.
/// `caller_key` is the original, unqualified key, carried through only so
/// it can be stamped onto the returned [`RateLimitState`].
pub trait Algorithm: Send + Sync + 'static {
    /// Algorithm name, for logging.
    fn name(&self) -> &'static str;

    /// Whether admission requires exclusive per-key access (C4) around the
    /// read-modify-write cycle. `false` for algorithms expressible as a
    /// single atomic storage counter (fixed window); `true` otherwise.
    fn needs_key_section(&self) -> bool {
        true
    }

    /// Check and, if admitted, consume `permits` against the limiter's
    /// state for this key. Always persists updated state, win or lose.
    fn admit<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        permits: u64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// A best-effort, non-mutating snapshot of current state.
    fn state<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        caller_key: &str,
    ) -> impl Future<Output = Result<Option<RateLimitState>>> + Send;
}

/// Floor used wherever a rate could be zero and would otherwise divide by
/// zero when computing a reset time.
pub(crate) const RATE_EPSILON: f64 = 1e-9;

pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds().max(0) as f64 / 1000.0
}

pub(crate) fn seconds_to_duration(seconds: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((seconds.max(0.0) * 1000.0).round() as i64)
}
