//! Builder for wiring the admission-control core.
//!
//! [`Heimdall::builder()`] assembles both subsystems around one injected
//! [`FastStore`], wraps the store in the [`TimeoutStore`] deadline
//! decorator, and creates the single [`StoreHealth`] signal they share —
//! so a limiter fail-open and a cache degradation raise the same flag.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::QueryCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::health::StoreHealth;
use crate::limiter::RateLimiter;
use crate::store::timeout::DEFAULT_STORE_TIMEOUT;
use crate::store::{FastStore, TimeoutStore};
use crate::{HeimdallError, Result};

/// Handle over the configured subsystems.
pub struct Heimdall {
    limiter: Arc<RateLimiter>,
    cache: Arc<QueryCache>,
    health: StoreHealth,
}

impl Heimdall {
    /// Create a new builder for configuring the core.
    pub fn builder() -> HeimdallBuilder {
        HeimdallBuilder::new()
    }

    /// The rate limiter, for the admission middleware.
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// The query cache, for the query service.
    pub fn query_cache(&self) -> Arc<QueryCache> {
        self.cache.clone()
    }

    /// The process-wide degraded-mode signal.
    pub fn health(&self) -> StoreHealth {
        self.health.clone()
    }
}

/// Builder for [`Heimdall`].
pub struct HeimdallBuilder {
    store: Option<Arc<dyn FastStore>>,
    clock: Arc<dyn Clock>,
    config: Config,
    store_timeout: Duration,
}

impl HeimdallBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            config: Config::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the fast store both subsystems coordinate through. Required.
    pub fn store(mut self, store: Arc<dyn FastStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the time source (tests inject a
    /// [`ManualClock`](crate::clock::ManualClock)).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set both subsystems' configuration at once.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the rate limiter configuration.
    pub fn limiter_config(mut self, config: crate::limiter::LimiterConfig) -> Self {
        self.config.rate_limiter = config;
        self
    }

    /// Set the query cache configuration.
    pub fn cache_config(mut self, config: crate::cache::CacheConfig) -> Self {
        self.config.cache = config;
        self
    }

    /// Set the per-call store deadline (default 100 ms). Zero disables
    /// the deadline decorator entirely — useful with in-process stores
    /// that cannot block.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Build the core.
    pub fn build(self) -> Result<Heimdall> {
        let store = self.store.ok_or(HeimdallError::NoStore)?;
        let store: Arc<dyn FastStore> = if self.store_timeout.is_zero() {
            store
        } else {
            Arc::new(TimeoutStore::new(store, self.store_timeout))
        };

        let health = StoreHealth::new();
        let limiter = RateLimiter::new(
            store.clone(),
            self.clock,
            self.config.rate_limiter,
            health.clone(),
        );
        let cache = QueryCache::new(store, self.config.cache, health.clone());

        Ok(Heimdall {
            limiter: Arc::new(limiter),
            cache: Arc::new(cache),
            health,
        })
    }
}

impl Default for HeimdallBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn missing_store_is_an_error() {
        let result = Heimdall::builder().build();
        assert!(matches!(result, Err(HeimdallError::NoStore)));
    }

    #[test]
    fn build_with_memory_store() {
        let core = Heimdall::builder()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert!(!core.health().is_degraded());
    }

    #[tokio::test]
    async fn subsystems_share_the_health_signal() {
        let store = Arc::new(MemoryStore::new());
        let core = Heimdall::builder().store(store.clone()).build().unwrap();

        store.set_unreachable(true);
        core.query_cache().get("u1", "fp").await.unwrap();

        // The cache's failure is visible through every handle
        assert!(core.health().is_degraded());
        assert!(core.rate_limiter().health().is_degraded());
    }
}
