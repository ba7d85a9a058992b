//! Deadline decorator for fast-store calls.
//!
//! The surrounding request must never block indefinitely on the fast store,
//! so every adapter call is bounded by a short deadline. [`TimeoutStore`]
//! wraps any [`FastStore`] and converts an elapsed deadline into
//! [`StoreError::Timeout`], which the limiter and cache already treat like
//! any other store failure (fail open, miss).
//!
//! The builder applies this decorator automatically; it exists as a
//! separate type so alternative backends get the same bound without
//! re-implementing it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{BucketCommand, BucketOutcome, FastStore, StoreError};

/// Default per-call deadline. Generous for a same-datacenter round-trip,
/// small next to a typical request budget.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Decorator that bounds every store call with a deadline.
pub struct TimeoutStore {
    inner: Arc<dyn FastStore>,
    deadline: Duration,
}

impl TimeoutStore {
    /// Wrap `inner`, bounding each call to `deadline`.
    pub fn new(inner: Arc<dyn FastStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T, Fut>(&self, fut: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

#[async_trait]
impl FastStore for TimeoutStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.bounded(self.inner.set(key, value, ttl)).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.bounded(self.inner.incr(key)).await
    }

    async fn bucket_update(
        &self,
        key: &str,
        cmd: &BucketCommand,
    ) -> Result<BucketOutcome, StoreError> {
        self.bounded(self.inner.bucket_update(key, cmd)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// A store whose calls never complete, for exercising the deadline.
    struct StalledStore;

    #[async_trait]
    impl FastStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            std::future::pending().await
        }

        async fn set(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
            std::future::pending().await
        }

        async fn bucket_update(
            &self,
            _key: &str,
            _cmd: &BucketCommand,
        ) -> Result<BucketOutcome, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let store = TimeoutStore::new(Arc::new(StalledStore), Duration::from_millis(50));
        assert!(matches!(store.get("k").await, Err(StoreError::Timeout)));
        assert!(matches!(store.incr("k").await, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let store = TimeoutStore::new(Arc::new(MemoryStore::new()), DEFAULT_STORE_TIMEOUT);
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), b"v");
        assert_eq!(store.incr("n").await.unwrap(), 1);
    }
}
