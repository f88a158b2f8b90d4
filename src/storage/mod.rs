//! Storage contract (C1) and its realizations: in-process (C2) and remote
//! (C3).
//!
//! This trait is the flat, string-keyed key/value contract spec.md §4.6
//! demands: `get` / `set` with optional TTL / atomic `incr` / floor-at-zero
//! `decr` / `remove` / `exists` / `expire`. It deliberately does not know
//! about algorithm state shapes (no `StorageEntry`-like struct as in the
//! teacher) — algorithms encode their own state into the string value, so
//! the same storage backend serves token bucket, leaky bucket, fixed
//! window and sliding window alike, and so a remote store can be shared
//! between heterogeneous clients without agreeing on a Rust type.
//!
//! `incr`/`decr` must be backend-native atomic operations, not
//! get-modify-set loops — see [`RedisStorage`] for why this matters once
//! more than one process shares a key.

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStorage};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Storage backend trait for rate limiting state.
///
/// All operations are async to support both local and distributed
/// backends. Implementations must be thread-safe (`Send + Sync`).
///
/// # Invariants (spec.md §4.6)
///
/// - `incr` and `decr` are linearizable with respect to each other on the
///   same key.
/// - `get` observes the effect of any `set`/`incr`/`decr` that
///   happens-before it from the caller's perspective.
/// - TTL expiry is eventual, never instantaneous, but never resurrects a
///   deleted value.
/// - Every key argument must be non-empty/non-blank; implementations
///   return [`crate::error::StorageError::InvalidKey`] otherwise (wrapped
///   by [`crate::error::RateLimitError::StorageUnavailable`] for
///   uniformity with other backend failures is *not* done — callers that
///   need the distinction should validate keys themselves via
///   [`crate::util::validate_non_blank`] before calling into storage;
///   callers inside this crate always do).
pub trait Storage: Send + Sync + 'static {
    /// Returns the current value, or `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Unconditionally writes `value`. `ttl` of `None` means "use the
    /// store's default TTL", not "never expire".
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically adds `delta` to the integer decoding of the value at
    /// `key` (an absent key is treated as 0) and returns the new value.
    /// If `ttl` is given, the TTL is refreshed as part of the same
    /// operation from the caller's perspective.
    fn incr(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Atomically subtracts `delta` from the value at `key`, floored at 0.
    /// An absent key is treated as 0 and this returns 0.
    fn decr(&self, key: &str, delta: i64) -> impl Future<Output = Result<i64>> + Send;

    /// Deletes `key`. Idempotent: no error if the key was already absent.
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Whether `key` is currently present (and not expired).
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Sets the TTL on an existing key. A no-op if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        (**self).incr(key, delta, ttl).await
    }

    async fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).decr(key, delta).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        (**self).expire(key, ttl).await
    }
}
