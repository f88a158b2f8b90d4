//! In-process storage (C2): realizes the storage contract over an
//! in-memory map with lazy TTL expiry and background garbage collection.
//!
//! Modeled on the teacher's `storage::memory_gc::MemoryStorage`, with one
//! correction: the teacher's background GC task clones the `DashMap`
//! itself to move it into the spawned task, which — because `DashMap`'s
//! `Clone` impl deep-copies its contents rather than sharing them — means
//! the teacher's periodic sweeper silently operates on a throwaway copy
//! and never reclaims the live map. Here the map lives behind an `Arc` and
//! the background task shares it, so GC actually reclaims memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::storage::Storage;
use crate::util::validate_non_blank;

/// Garbage collection cadence.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N requests.
    Requests(u64),
    /// Run GC at fixed time intervals via a background task.
    Duration(Duration),
    /// Disable automatic GC; callers must invoke `run_gc` themselves.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10_000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
    /// The default TTL applied when `set`/`incr` are called without an
    /// explicit TTL (spec.md §4.6: "absent TTL means store-default, not
    /// infinite").
    pub default_ttl: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: GcInterval::default(),
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl GcConfig {
    /// Config with request-count-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
            ..Default::default()
        }
    }

    /// Config with duration-based background GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
            ..Default::default()
        }
    }

    /// Config with manual-only GC.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
            ..Default::default()
        }
    }

    /// Override the store-default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

struct InternalEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory storage with lazy expiry and garbage collection.
pub struct MemoryStorage {
    data: Arc<DashMap<String, InternalEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Storage with default GC (every 10,000 requests, 300s default TTL).
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Storage with a custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    fn start_gc_task(&self, interval: Duration) {
        let data = self.data.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        run_gc_on_map(&data);
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    /// Trigger garbage collection immediately.
    pub fn run_gc(&self) {
        run_gc_on_map(&self.data);
    }

    /// Number of entries currently stored (including not-yet-swept expired
    /// entries).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.data.clear();
    }

    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                if let Some(_guard) = self.gc_lock.try_lock() {
                    run_gc_on_map(&self.data);
                }
            }
        }
    }

    fn ttl_or_default(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.gc_config.default_ttl)
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

fn run_gc_on_map(data: &DashMap<String, InternalEntry>) {
    let now = Instant::now();
    data.retain(|_, entry| entry.expires_at > now);
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_non_blank(key, "key")?;
        self.maybe_run_gc();

        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.data.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        validate_non_blank(key, "key")?;
        self.maybe_run_gc();

        let expires_at = Instant::now() + self.ttl_or_default(ttl);
        self.data
            .insert(key.to_string(), InternalEntry { value, expires_at });
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        validate_non_blank(key, "key")?;
        self.maybe_run_gc();

        let now = Instant::now();
        let expires_at_override = ttl.map(|d| now + d);
        let default_expiry = now + self.gc_config.default_ttl;

        let mut new_value = 0i64;
        self.data
            .entry(key.to_string())
            .and_modify(|entry| {
                let was_expired = entry.expires_at <= now;
                let current: i64 = if was_expired { 0 } else { entry.value.parse().unwrap_or(0) };
                new_value = current + delta;
                entry.value = new_value.to_string();
                if let Some(expires_at) = expires_at_override {
                    entry.expires_at = expires_at;
                } else if was_expired {
                    // A reset-to-zero write needs a fresh TTL too, else the
                    // just-incremented value keeps the old, already-past
                    // `expires_at` and is deleted on the very next read.
                    entry.expires_at = default_expiry;
                }
            })
            .or_insert_with(|| {
                new_value = delta;
                InternalEntry {
                    value: delta.to_string(),
                    expires_at: expires_at_override.unwrap_or(default_expiry),
                }
            });

        Ok(new_value)
    }

    async fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        validate_non_blank(key, "key")?;
        self.maybe_run_gc();

        let now = Instant::now();
        let mut new_value = 0i64;

        if let Some(mut entry) = self.data.get_mut(key) {
            let current: i64 = if entry.expires_at > now {
                entry.value.parse().unwrap_or(0)
            } else {
                0
            };
            new_value = (current - delta).max(0);
            entry.value = new_value.to_string();
        }
        // Absent key: treated as 0, returns 0, does not create the key.

        Ok(new_value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_non_blank(key, "key")?;
        self.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_non_blank(key, "key")?;
        let now = Instant::now();
        Ok(self
            .data
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        validate_non_blank(key, "key")?;
        if let Some(mut entry) = self.data.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
        Ok(())
    }
}
