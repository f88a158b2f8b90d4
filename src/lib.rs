//! Rate limiting policy engine: token bucket, leaky bucket, fixed window
//! and sliding window algorithms over a pluggable storage backend.
//!
//! # Quick start
//!
//! ```
//! use throttlecore::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let factory = PolicyFactory::new(MemoryStorage::new());
//! let policy = factory.create(PolicyConfig::new(
//!     "login-attempts",
//!     AlgorithmKind::TokenBucket,
//!     5,
//!     Duration::from_secs(60),
//! ))?;
//!
//! if policy.admit("user:42", 1, None).await? {
//!     println!("request admitted");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Burst | Best for |
//! |-----------|-------|----------|
//! | Token bucket | Generous | Bursty client traffic |
//! | Leaky bucket | None | Smoothing output toward a downstream dependency |
//! | Fixed window | Up to 2x at boundary (by design) | Cheap, simple quotas |
//! | Sliding window | Precise | Strict per-window guarantees |
//!
//! # Feature flags
//!
//! - `memory` (default): in-process storage with garbage collection.
//! - `redis`: distributed storage over a shared Redis instance.

pub mod algorithm;
pub mod error;
pub mod keylock;
pub mod policy;
pub mod state;
pub mod storage;
mod util;

pub use algorithm::{Algorithm, FixedWindow, LeakyBucket, SlidingWindow, TokenBucket};
pub use error::{RateLimitError, Result, StorageError};
pub use keylock::KeyLock;
pub use policy::{AlgorithmKind, AlgorithmParameters, Policy, PolicyConfig, PolicyFactory};
pub use state::RateLimitState;
pub use storage::Storage;

#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::algorithm::Algorithm;
    pub use crate::error::{RateLimitError, Result};
    pub use crate::policy::{AlgorithmKind, AlgorithmParameters, Policy, PolicyConfig, PolicyFactory};
    pub use crate::state::RateLimitState;
    pub use crate::storage::Storage;

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStorage};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::time::Duration;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn end_to_end_token_bucket() {
        let factory = PolicyFactory::new(MemoryStorage::new());
        let policy = factory
            .create(PolicyConfig::new(
                "api",
                AlgorithmKind::TokenBucket,
                3,
                Duration::from_secs(60),
            ))
            .unwrap();

        assert!(policy.admit("user:1", 1, None).await.unwrap());
        assert!(policy.admit("user:1", 1, None).await.unwrap());
        assert!(policy.admit("user:1", 1, None).await.unwrap());
        assert!(!policy.admit("user:1", 1, None).await.unwrap());

        let snapshot = policy.state("user:1").await.unwrap().unwrap();
        assert_eq!(snapshot.total_permits, 3);
        assert_eq!(snapshot.remaining_permits, 0);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn end_to_end_fixed_window_resets_per_window() {
        let factory = PolicyFactory::new(MemoryStorage::new());
        let policy = factory
            .create(PolicyConfig::new(
                "route",
                AlgorithmKind::FixedWindow,
                3,
                Duration::from_millis(100),
            ))
            .unwrap();

        assert!(policy.admit("k", 3, None).await.unwrap());
        assert!(!policy.admit("k", 1, None).await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(policy.admit("k", 1, None).await.unwrap());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn shared_storage_is_visible_across_policies_sharing_a_factory() {
        let factory = PolicyFactory::new(MemoryStorage::new());
        let policy_a = factory
            .create(PolicyConfig::new(
                "shared",
                AlgorithmKind::FixedWindow,
                2,
                Duration::from_secs(60),
            ))
            .unwrap();
        let policy_b = factory
            .create(PolicyConfig::new(
                "shared",
                AlgorithmKind::FixedWindow,
                2,
                Duration::from_secs(60),
            ))
            .unwrap();

        assert!(policy_a.admit("user:1", 2, None).await.unwrap());
        // Same policy name + key -> same storage key, so policy_b observes
        // policy_a's writes through the shared MemoryStorage instance.
        assert!(!policy_b.admit("user:1", 1, None).await.unwrap());
    }
}
