//! Versioned query cache.
//!
//! [`QueryCache`] accelerates repeated range queries against the
//! source-of-truth store while guaranteeing that a committed write is
//! visible to every subsequent read. Entries are keyed by
//! `(tenant, fingerprint, version)` where `version` is a per-tenant
//! monotonic counter in the fast store:
//!
//! - `{prefix}:version:{tenant}` — the tenant's current version. Absent
//!   reads as 0; [`invalidate`](QueryCache::invalidate) bumps it with one
//!   atomic increment.
//! - `{prefix}:{tenant}:v{version}:{fingerprint}` — a cached result,
//!   stored with a TTL.
//!
//! # Why versioning instead of deletion
//!
//! Invalidating "all cached queries for tenant T" by deleting keys would
//! require enumerating every fingerprint the tenant ever queried — an
//! unbounded, unknown set. Bumping the version counter makes every entry
//! written under the old version unreachable in one O(1) atomic operation;
//! the orphaned entries sit out their TTL and expire. No read path can
//! address them, because reads always look up under the current version.
//!
//! # Best-effort by contract
//!
//! A cache failure must never become a query failure: store errors on the
//! read path are misses, store errors on the write path are swallowed
//! (logged, counted, and surfaced via [`StoreHealth`]). The only errors
//! these methods return are malformed inputs, which are collaborator bugs.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::health::StoreHealth;
use crate::store::{FastStore, StoreError};
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Default entry TTL: five minutes. Invalidation does not wait for this —
/// it only bounds how long orphaned entries occupy the store.
const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(300);

/// Default key-namespace prefix.
const DEFAULT_PREFIX: &str = "cache";

/// Configuration for the query cache.
///
/// ```rust
/// # use heimdall::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(60))
///     .prefix("records");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached entries. Default: 5 minutes.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Namespace prefix for all cache keys. Default: `"cache"`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_ENTRY_TTL.as_secs()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            prefix: default_prefix(),
        }
    }
}

impl CacheConfig {
    /// Create a config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// Set the key-namespace prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Entry TTL as a [`Duration`].
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Version-tagged read cache over the fast store.
pub struct QueryCache {
    store: Arc<dyn FastStore>,
    config: CacheConfig,
    health: StoreHealth,
}

impl QueryCache {
    /// Create a cache. Prefer wiring through
    /// [`Heimdall::builder()`](crate::Heimdall::builder), which shares the
    /// health signal with the rate limiter.
    pub fn new(store: Arc<dyn FastStore>, config: CacheConfig, health: StoreHealth) -> Self {
        Self {
            store,
            config,
            health,
        }
    }

    /// The shared degraded-mode signal.
    pub fn health(&self) -> &StoreHealth {
        &self.health
    }

    /// Look up the cached result for `(tenant, fingerprint)` under the
    /// tenant's current version.
    ///
    /// Returns `Ok(None)` on miss — including when the store is
    /// unreachable or the stored bytes cannot be fetched. `Err` only for
    /// empty inputs.
    pub async fn get(&self, tenant: &str, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        validate_key_part("tenant", tenant)?;
        validate_key_part("fingerprint", fingerprint)?;

        let version = match self.current_version(tenant).await {
            Ok(v) => v,
            Err(e) => {
                self.record_store_failure("get", tenant, &e);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                return Ok(None);
            }
        };

        let key = self.entry_key(tenant, version, fingerprint);
        match self.store.get(&key).await {
            Ok(Some(value)) => {
                self.health.record_success();
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Ok(Some(value))
            }
            Ok(None) => {
                self.health.record_success();
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                Ok(None)
            }
            Err(e) => {
                self.record_store_failure("get", tenant, &e);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                Ok(None)
            }
        }
    }

    /// Cache `value` for `(tenant, fingerprint)` under the tenant's
    /// current version, with the configured TTL.
    ///
    /// Best-effort: a store failure is logged and swallowed.
    pub async fn put(&self, tenant: &str, fingerprint: &str, value: &[u8]) -> Result<()> {
        self.put_with_ttl(tenant, fingerprint, value, self.config.entry_ttl())
            .await
    }

    /// [`put`](Self::put) with an explicit TTL. Zero TTL is rejected —
    /// the entry would be unreadable, so the caller's intent is unclear.
    pub async fn put_with_ttl(
        &self,
        tenant: &str,
        fingerprint: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        validate_key_part("tenant", tenant)?;
        validate_key_part("fingerprint", fingerprint)?;
        if ttl.is_zero() {
            return Err(HeimdallError::InvalidInput("ttl must be non-zero".into()));
        }

        // Re-read the version at write time: an invalidation racing this
        // put lands the entry under the old version, where no read can
        // ever see it. Stale data stays unreachable, not wrong.
        let version = match self.current_version(tenant).await {
            Ok(v) => v,
            Err(e) => {
                self.record_store_failure("set", tenant, &e);
                return Ok(());
            }
        };

        let key = self.entry_key(tenant, version, fingerprint);
        match self.store.set(&key, value, ttl).await {
            Ok(()) => self.health.record_success(),
            Err(e) => self.record_store_failure("set", tenant, &e),
        }
        Ok(())
    }

    /// Make every cached entry for `tenant` unreachable by atomically
    /// bumping the tenant's version. Returns the new version, or `None`
    /// when the store is unreachable (never raises for store failures).
    ///
    /// Concurrent invalidations each apply exactly once — K racing calls
    /// advance the version by exactly K.
    pub async fn invalidate(&self, tenant: &str) -> Result<Option<u64>> {
        validate_key_part("tenant", tenant)?;

        match self.store.incr(&self.version_key(tenant)).await {
            Ok(version) => {
                self.health.record_success();
                metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(1);
                Ok(Some(version.max(0) as u64))
            }
            Err(e) => {
                self.record_store_failure("incr", tenant, &e);
                Ok(None)
            }
        }
    }

    /// The tenant's current version, or `None` when the store is
    /// unreachable. Observability accessor; the read paths use the same
    /// lookup internally.
    pub async fn version(&self, tenant: &str) -> Option<u64> {
        self.current_version(tenant).await.ok()
    }

    /// Typed lookup: deserialize the cached JSON for `(tenant,
    /// fingerprint)`. A corrupt entry is a miss, not an error — the
    /// caller falls through to the source of truth and overwrites it.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        tenant: &str,
        fingerprint: &str,
    ) -> Result<Option<T>> {
        let Some(bytes) = self.get(tenant, fingerprint).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(tenant, fingerprint, error = %e,
                    "cached entry failed to deserialize, treating as miss");
                Ok(None)
            }
        }
    }

    /// Typed store: serialize `value` as JSON and cache it with the
    /// configured TTL.
    pub async fn put_json<T: Serialize>(
        &self,
        tenant: &str,
        fingerprint: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(tenant, fingerprint, &bytes).await
    }

    /// Read the tenant's version counter; absent means version 0 (the
    /// counter is created lazily by the first `invalidate`).
    async fn current_version(&self, tenant: &str) -> std::result::Result<u64, StoreError> {
        let bytes = self.store.get(&self.version_key(tenant)).await?;
        let Some(bytes) = bytes else {
            return Ok(0);
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| StoreError::Data(format!("unparsable version counter for {tenant:?}")))
    }

    fn record_store_failure(&self, operation: &'static str, tenant: &str, e: &StoreError) {
        warn!(tenant, operation, error = %e, "cache store call failed, degrading");
        metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
        self.health.record_failure(e);
    }

    fn version_key(&self, tenant: &str) -> String {
        format!("{}:version:{}", self.config.prefix, tenant)
    }

    fn entry_key(&self, tenant: &str, version: u64, fingerprint: &str) -> String {
        format!("{}:{}:v{}:{}", self.config.prefix, tenant, version, fingerprint)
    }
}

fn validate_key_part(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HeimdallError::InvalidInput(format!(
            "{name} must be non-empty"
        )));
    }
    Ok(())
}
