//! Policy factory (C9): turns a declarative configuration into a live
//! limiter.
//!
//! The teacher's own `policy.rs` defines something unrelated and
//! incompatible with this crate's "Policy" — a chain of
//! penalty/credit/composite adjustments to a token cost computed from an
//! HTTP response code (`DefaultPolicy`/`PenaltyPolicy`/`CreditPolicy`/
//! `CompositePolicy`). That concept belongs to the HTTP-middleware layer
//! this crate does not carry, so it is not reused here; this module is
//! written fresh against spec.md §3/§4.8, borrowing only the teacher's
//! `Quota`/`QuotaBuilder` validate-then-derive shape (`quota.rs`) for how
//! `PolicyConfig`'s builder and [`PolicyFactory`] are put together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::algorithm::{Algorithm, FixedWindow, LeakyBucket, SlidingWindow, TokenBucket};
use crate::error::{RateLimitError, Result};
use crate::keylock::KeyLock;
use crate::state::RateLimitState;
use crate::storage::Storage;
use crate::util::{validate_non_blank, validate_permits};

const DEFAULT_TOKEN_BUCKET_TTL: Duration = Duration::from_secs(300);
const DEFAULT_LEAKY_BUCKET_TTL: Duration = Duration::from_secs(3600);

/// Which of the four algorithms a policy is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
}

impl AlgorithmKind {
    /// Parse a case-insensitive algorithm name, accepting both
    /// hyphen- and underscore-separated spellings.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "token-bucket" => Ok(Self::TokenBucket),
            "leaky-bucket" => Ok(Self::LeakyBucket),
            "fixed-window" => Ok(Self::FixedWindow),
            "sliding-window" => Ok(Self::SlidingWindow),
            other => Err(RateLimitError::invalid_argument(format!(
                "unknown algorithm: {other}"
            ))),
        }
    }

    fn storage_prefix(self) -> &'static str {
        match self {
            Self::TokenBucket => "tokenbucket",
            Self::LeakyBucket => "leakybucket",
            Self::FixedWindow => "fixedwindow",
            Self::SlidingWindow => "slidingwindow",
        }
    }
}

/// Algorithm-specific knobs, omitted fields are derived from
/// `max_requests`/`window` per spec.md §4.8.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmParameters {
    /// Bucket capacity (token/leaky bucket only).
    pub capacity: Option<f64>,
    /// Token bucket refill rate, tokens/sec.
    pub refill_rate: Option<f64>,
    /// Leaky bucket leak rate, requests/sec.
    pub leak_rate: Option<f64>,
}

impl AlgorithmParameters {
    /// An empty set of parameters; everything is derived.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    pub fn with_leak_rate(mut self, rate: f64) -> Self {
        self.leak_rate = Some(rate);
        self
    }

    fn resolved_capacity(&self, max_requests: u64) -> f64 {
        self.capacity.unwrap_or(max_requests as f64)
    }

    fn resolved_token_rate(&self, max_requests: u64, window: Duration) -> f64 {
        self.refill_rate
            .unwrap_or_else(|| max_requests as f64 / window.as_secs_f64())
    }

    fn resolved_leak_rate(&self, max_requests: u64, window: Duration) -> f64 {
        self.leak_rate
            .or(self.refill_rate)
            .unwrap_or_else(|| max_requests as f64 / window.as_secs_f64())
    }
}

/// Declarative policy configuration, as accepted by [`PolicyFactory::create`].
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    name: String,
    algorithm: AlgorithmKind,
    max_requests: u64,
    window: Duration,
    parameters: AlgorithmParameters,
    /// Override for the bucket algorithms' inactivity TTL; ignored by the
    /// window algorithms, whose TTL is structurally tied to `window`.
    ttl: Option<Duration>,
    /// When `true`, a `storage-unavailable` error during `admit` is treated
    /// as an admit (logged) instead of being propagated. Default is
    /// fail-closed (spec.md §4.10/§7: fail-open requires an explicit opt-in).
    fail_open: bool,
}

impl PolicyConfig {
    /// A minimal configuration; algorithm parameters and TTL are derived.
    pub fn new(name: impl Into<String>, algorithm: AlgorithmKind, max_requests: u64, window: Duration) -> Self {
        Self {
            name: name.into(),
            algorithm,
            max_requests,
            window,
            parameters: AlgorithmParameters::default(),
            ttl: None,
            fail_open: false,
        }
    }

    pub fn with_parameters(mut self, parameters: AlgorithmParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Opt into fail-open: a storage failure during `admit` is treated as
    /// an admit rather than surfaced to the caller.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }
}

enum AlgorithmImpl {
    TokenBucket(TokenBucket),
    LeakyBucket(LeakyBucket),
    FixedWindow(FixedWindow),
    SlidingWindow(SlidingWindow),
}

impl AlgorithmImpl {
    fn needs_key_section(&self) -> bool {
        match self {
            Self::TokenBucket(a) => a.needs_key_section(),
            Self::LeakyBucket(a) => a.needs_key_section(),
            Self::FixedWindow(a) => a.needs_key_section(),
            Self::SlidingWindow(a) => a.needs_key_section(),
        }
    }

    async fn admit<S: Storage>(&self, storage: &S, storage_key: &str, permits: u64) -> Result<bool> {
        match self {
            Self::TokenBucket(a) => a.admit(storage, storage_key, permits).await,
            Self::LeakyBucket(a) => a.admit(storage, storage_key, permits).await,
            Self::FixedWindow(a) => a.admit(storage, storage_key, permits).await,
            Self::SlidingWindow(a) => a.admit(storage, storage_key, permits).await,
        }
    }

    async fn state<S: Storage>(
        &self,
        storage: &S,
        storage_key: &str,
        caller_key: &str,
    ) -> Result<Option<RateLimitState>> {
        match self {
            Self::TokenBucket(a) => a.state(storage, storage_key, caller_key).await,
            Self::LeakyBucket(a) => a.state(storage, storage_key, caller_key).await,
            Self::FixedWindow(a) => a.state(storage, storage_key, caller_key).await,
            Self::SlidingWindow(a) => a.state(storage, storage_key, caller_key).await,
        }
    }
}

fn validate_numerics(algorithm: AlgorithmKind, max_requests: u64, window: Duration, parameters: &AlgorithmParameters) -> Result<()> {
    if max_requests == 0 {
        return Err(RateLimitError::out_of_range("max_requests must be greater than 0"));
    }
    if window.is_zero() {
        return Err(RateLimitError::out_of_range("window must be greater than 0"));
    }

    match algorithm {
        AlgorithmKind::TokenBucket => {
            let capacity = parameters.resolved_capacity(max_requests);
            let rate = parameters.resolved_token_rate(max_requests, window);
            if capacity <= 0.0 {
                return Err(RateLimitError::out_of_range("capacity must be greater than 0"));
            }
            if rate < 0.0 {
                return Err(RateLimitError::out_of_range("refill_rate must be non-negative"));
            }
        }
        AlgorithmKind::LeakyBucket => {
            let capacity = parameters.resolved_capacity(max_requests);
            let rate = parameters.resolved_leak_rate(max_requests, window);
            if capacity <= 0.0 {
                return Err(RateLimitError::out_of_range("capacity must be greater than 0"));
            }
            if rate <= 0.0 {
                return Err(RateLimitError::out_of_range("leak_rate must be greater than 0"));
            }
        }
        AlgorithmKind::FixedWindow | AlgorithmKind::SlidingWindow => {
            // Parameters are irrelevant to window algorithms (spec.md §4.8).
        }
    }

    Ok(())
}

fn build_algorithm(algorithm: AlgorithmKind, max_requests: u64, window: Duration, parameters: &AlgorithmParameters, ttl: Option<Duration>) -> AlgorithmImpl {
    match algorithm {
        AlgorithmKind::TokenBucket => AlgorithmImpl::TokenBucket(TokenBucket::new(
            parameters.resolved_capacity(max_requests),
            parameters.resolved_token_rate(max_requests, window),
            ttl.unwrap_or(DEFAULT_TOKEN_BUCKET_TTL),
        )),
        AlgorithmKind::LeakyBucket => AlgorithmImpl::LeakyBucket(LeakyBucket::new(
            parameters.resolved_capacity(max_requests),
            parameters.resolved_leak_rate(max_requests, window),
            ttl.unwrap_or(DEFAULT_LEAKY_BUCKET_TTL),
        )),
        AlgorithmKind::FixedWindow => AlgorithmImpl::FixedWindow(FixedWindow::new(max_requests, window)),
        AlgorithmKind::SlidingWindow => AlgorithmImpl::SlidingWindow(SlidingWindow::new(max_requests, window)),
    }
}

/// A live rate limiter, built by [`PolicyFactory`] from a [`PolicyConfig`].
///
/// Holds its own per-key serializer table (C4); callers share one `Policy`
/// across however many concurrent callers need the same rate limit.
pub struct Policy<S: Storage> {
    name: String,
    algorithm_kind: AlgorithmKind,
    max_requests: u64,
    window: Duration,
    parameters: AlgorithmParameters,
    algorithm: AlgorithmImpl,
    storage: Arc<S>,
    key_lock: KeyLock,
    fail_open: bool,
}

impl<S: Storage> Policy<S> {
    /// The policy's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The algorithm this policy runs.
    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm_kind
    }

    /// The configured request limit.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The algorithm parameters this policy was built with (after
    /// derivation).
    pub fn parameters(&self) -> &AlgorithmParameters {
        &self.parameters
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.algorithm_kind.storage_prefix(), self.name, key)
    }

    /// Check whether `permits` are admitted for `key`, consuming them if so.
    ///
    /// `deadline` bounds both waiting for the per-key section and the
    /// storage round-trip; if it elapses before the call completes, this
    /// returns [`RateLimitError::Cancelled`] and no permits are consumed.
    ///
    /// On a `storage-unavailable` error, this fails closed (returns the
    /// error) unless the policy was built with [`PolicyConfig::with_fail_open`],
    /// in which case the request is admitted and the failure is logged.
    pub async fn admit(&self, key: &str, permits: u64, deadline: Option<Instant>) -> Result<bool> {
        validate_non_blank(key, "key")?;
        validate_permits(permits)?;

        let storage_key = self.storage_key(key);

        let work = async {
            if self.algorithm.needs_key_section() {
                let _section = self.key_lock.acquire(key, deadline).await?;
                self.algorithm.admit(&*self.storage, &storage_key, permits).await
            } else {
                self.algorithm.admit(&*self.storage, &storage_key, permits).await
            }
        };

        let result = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, work).await {
                    Ok(result) => result,
                    Err(_) => Err(RateLimitError::Cancelled),
                }
            }
            None => work.await,
        };

        match result {
            Err(RateLimitError::StorageUnavailable(err)) if self.fail_open => {
                tracing::warn!(
                    policy = %self.name,
                    key,
                    error = %err,
                    "storage unavailable, admitting under fail-open policy"
                );
                Ok(true)
            }
            other => other,
        }
    }

    /// A best-effort snapshot of `key`'s current state. Never mutates
    /// storage and never acquires the per-key section (spec.md §9: the
    /// snapshot may be momentarily stale, never acquiring the section in
    /// exchange for never blocking on it).
    pub async fn state(&self, key: &str) -> Result<Option<RateLimitState>> {
        validate_non_blank(key, "key")?;
        let storage_key = self.storage_key(key);
        self.algorithm.state(&*self.storage, &storage_key, key).await
    }
}

/// Builds [`Policy`] instances from declarative configuration, wired to a
/// shared storage backend.
pub struct PolicyFactory<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> PolicyFactory<S> {
    /// Build a factory over the given storage backend.
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Build a policy from a typed configuration.
    pub fn create(&self, config: PolicyConfig) -> Result<Policy<S>> {
        validate_non_blank(&config.name, "name")?;
        validate_numerics(config.algorithm, config.max_requests, config.window, &config.parameters)?;

        let algorithm = build_algorithm(
            config.algorithm,
            config.max_requests,
            config.window,
            &config.parameters,
            config.ttl,
        );

        Ok(Policy {
            name: config.name,
            algorithm_kind: config.algorithm,
            max_requests: config.max_requests,
            window: config.window,
            parameters: config.parameters,
            algorithm,
            storage: self.storage.clone(),
            key_lock: KeyLock::new(),
            fail_open: config.fail_open,
        })
    }

    /// Build a policy by algorithm name rather than a typed [`AlgorithmKind`].
    pub fn create_by_name(
        &self,
        name: impl Into<String>,
        algorithm: &str,
        max_requests: u64,
        window: Duration,
        parameters: Option<AlgorithmParameters>,
    ) -> Result<Policy<S>> {
        let kind = AlgorithmKind::parse(algorithm)?;
        let mut config = PolicyConfig::new(name, kind, max_requests, window);
        if let Some(parameters) = parameters {
            config = config.with_parameters(parameters);
        }
        self.create(config)
    }

    /// Build a policy from an untyped string map, as would arrive from
    /// externally-sourced configuration. Recognized keys: `algorithm`
    /// (required), `max_requests` (required), `window_seconds` (required),
    /// `capacity`, `refill_rate`, `leak_rate`, `fail_open` (all optional).
    pub fn create_from_map(&self, name: impl Into<String>, map: &HashMap<String, String>) -> Result<Policy<S>> {
        let algorithm_str = map
            .get("algorithm")
            .ok_or_else(|| RateLimitError::invalid_argument("missing required config key: algorithm"))?;
        let algorithm = AlgorithmKind::parse(algorithm_str)?;

        let max_requests: u64 = map
            .get("max_requests")
            .ok_or_else(|| RateLimitError::invalid_argument("missing required config key: max_requests"))?
            .parse()
            .map_err(|_| RateLimitError::invalid_argument("max_requests is not a valid integer"))?;

        let window_secs: f64 = map
            .get("window_seconds")
            .ok_or_else(|| RateLimitError::invalid_argument("missing required config key: window_seconds"))?
            .parse()
            .map_err(|_| RateLimitError::invalid_argument("window_seconds is not a valid number"))?;
        let window = Duration::from_secs_f64(window_secs.max(0.0));

        let mut parameters = AlgorithmParameters::new();
        if let Some(value) = map.get("capacity") {
            parameters.capacity = Some(parse_f64(value, "capacity")?);
        }
        if let Some(value) = map.get("refill_rate") {
            parameters.refill_rate = Some(parse_f64(value, "refill_rate")?);
        }
        if let Some(value) = map.get("leak_rate") {
            parameters.leak_rate = Some(parse_f64(value, "leak_rate")?);
        }

        let mut config = PolicyConfig::new(name, algorithm, max_requests, window).with_parameters(parameters);
        if let Some(value) = map.get("fail_open") {
            let fail_open: bool = value
                .parse()
                .map_err(|_| RateLimitError::invalid_argument("fail_open is not a valid boolean"))?;
            config = config.with_fail_open(fail_open);
        }

        self.create(config)
    }
}

fn parse_f64(value: &str, field: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| RateLimitError::invalid_argument(format!("{field} is not a valid number")))
}
