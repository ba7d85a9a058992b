//! In-process fast store.
//!
//! [`MemoryStore`] implements the full [`FastStore`] contract against a
//! mutex-guarded map. Holding the mutex across `incr` and `bucket_update`
//! is what makes them atomic — the in-process analogue of the server-side
//! procedure a networked store would run.
//!
//! Built for tests and embedded single-instance use:
//!
//! - TTLs are driven by an injectable [`Clock`], so tests advance time
//!   instead of sleeping.
//! - [`set_unreachable`](MemoryStore::set_unreachable) makes every call
//!   fail with [`StoreError::Unavailable`], simulating an outage for the
//!   fail-open and degraded-mode paths.
//!
//! Value semantics mirror a Redis-style store: a counter created by `incr`
//! reads back through `get` as its decimal string, and `incr` on a value
//! written by `set` works when the bytes parse as an integer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};

use super::{BucketCommand, BucketOutcome, FastStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Counter(i64),
    Bucket { tokens: f64, last_refill: f64 },
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Absolute expiry in epoch seconds; `None` never expires.
    expires_at: Option<f64>,
}

/// In-process [`FastStore`] implementation.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    unreachable: AtomicBool,
}

impl MemoryStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock (tests pass a
    /// [`ManualClock`](crate::clock::ManualClock)).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            unreachable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .values()
            .filter(|e| !expired(e, now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    /// Fetch a live entry, dropping it if its TTL has lapsed.
    fn live_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: f64,
    ) -> Option<&'a Entry> {
        if map.get(key).is_some_and(|e| expired(e, now)) {
            map.remove(key);
        }
        map.get(key)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(entry: &Entry, now: f64) -> bool {
    entry.expires_at.is_some_and(|at| now >= at)
}

fn expiry(now: f64, ttl: Duration) -> Option<f64> {
    Some(now + ttl.as_secs_f64())
}

#[async_trait]
impl FastStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_reachable()?;
        let now = self.clock.now();
        let mut map = self.entries.lock().expect("store mutex poisoned");
        let value = match Self::live_entry(&mut map, key, now) {
            Some(entry) => match &entry.value {
                Value::Bytes(b) => Some(b.clone()),
                Value::Counter(n) => Some(n.to_string().into_bytes()),
                Value::Bucket { .. } => {
                    return Err(StoreError::Data(format!(
                        "key {key:?} holds a bucket, not a plain value"
                    )));
                }
            },
            None => None,
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check_reachable()?;
        let now = self.clock.now();
        let mut map = self.entries.lock().expect("store mutex poisoned");
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.check_reachable()?;
        let now = self.clock.now();
        let mut map = self.entries.lock().expect("store mutex poisoned");

        let next = match Self::live_entry(&mut map, key, now) {
            None => 1,
            Some(entry) => match &entry.value {
                Value::Counter(n) => n + 1,
                Value::Bytes(b) => std::str::from_utf8(b)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .map(|n| n + 1)
                    .ok_or_else(|| {
                        StoreError::Data(format!("key {key:?} is not an integer"))
                    })?,
                Value::Bucket { .. } => {
                    return Err(StoreError::Data(format!(
                        "key {key:?} holds a bucket, not a counter"
                    )));
                }
            },
        };

        // Counters carry no TTL — tenant versions live for the tenant's
        // lifetime. A pre-existing expiry from `set` is dropped, matching
        // the "persists indefinitely" counter lifecycle.
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(next),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn bucket_update(
        &self,
        key: &str,
        cmd: &BucketCommand,
    ) -> Result<BucketOutcome, StoreError> {
        self.check_reachable()?;
        let clock_now = self.clock.now();
        let mut map = self.entries.lock().expect("store mutex poisoned");

        let (mut tokens, last_refill) = match Self::live_entry(&mut map, key, clock_now) {
            Some(Entry {
                value: Value::Bucket { tokens, last_refill },
                ..
            }) => (*tokens, *last_refill),
            Some(_) => {
                return Err(StoreError::Data(format!(
                    "key {key:?} does not hold a bucket"
                )));
            }
            None => (cmd.capacity, cmd.now),
        };

        // Clamp negative elapsed (clock skew between instances) to zero.
        let elapsed = (cmd.now - last_refill).max(0.0);
        tokens = (tokens + elapsed * cmd.refill_rate).min(cmd.capacity);

        let allowed = tokens >= cmd.requested;
        if allowed {
            tokens -= cmd.requested;
        }

        map.insert(
            key.to_string(),
            Entry {
                value: Value::Bucket {
                    tokens,
                    last_refill: cmd.now,
                },
                expires_at: expiry(clock_now, cmd.ttl),
            },
        );

        Ok(BucketOutcome { allowed, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    fn cmd(now: f64) -> BucketCommand {
        BucketCommand {
            capacity: 10.0,
            refill_rate: 1.0,
            now,
            requested: 1.0,
            ttl: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn get_absent_is_none_not_error() {
        let (_, store) = manual_store();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let (_, store) = manual_store();
        store
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), b"value");
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let (clock, store) = manual_store();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();

        clock.advance(59.0);
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(2.0);
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incr_creates_at_one_and_counts_up() {
        let (_, store) = manual_store();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn counter_reads_back_as_decimal_string() {
        let (_, store) = manual_store();
        store.incr("n").await.unwrap();
        store.incr("n").await.unwrap();
        assert_eq!(store.get("n").await.unwrap().unwrap(), b"2");
    }

    #[tokio::test]
    async fn incr_on_non_integer_bytes_is_data_error() {
        let (_, store) = manual_store();
        store
            .set("k", b"not a number", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            store.incr("k").await,
            Err(StoreError::Data(_))
        ));
    }

    #[tokio::test]
    async fn fresh_bucket_starts_full_and_consumes() {
        let (_, store) = manual_store();
        let outcome = store.bucket_update("b", &cmd(1_000.0)).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.tokens, 9.0);
    }

    #[tokio::test]
    async fn bucket_refills_with_elapsed_time() {
        let (_, store) = manual_store();
        // Drain the bucket
        for _ in 0..10 {
            assert!(store.bucket_update("b", &cmd(1_000.0)).await.unwrap().allowed);
        }
        assert!(!store.bucket_update("b", &cmd(1_000.0)).await.unwrap().allowed);

        // 2.5 seconds at 1 token/s
        let outcome = store.bucket_update("b", &cmd(1_002.5)).await.unwrap();
        assert!(outcome.allowed);
        assert!((outcome.tokens - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bucket_refill_caps_at_capacity() {
        let (_, store) = manual_store();
        store.bucket_update("b", &cmd(1_000.0)).await.unwrap();

        // A very long idle period must not overfill
        let outcome = store.bucket_update("b", &cmd(9_999.0)).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.tokens, 9.0); // capacity 10 minus this request
    }

    #[tokio::test]
    async fn denied_update_still_persists_refill_bookkeeping() {
        let (_, store) = manual_store();
        for _ in 0..10 {
            store.bucket_update("b", &cmd(1_000.0)).await.unwrap();
        }

        let denied = store.bucket_update("b", &cmd(1_000.2)).await.unwrap();
        assert!(!denied.allowed);
        // 0.2 tokens accrued, none consumed
        assert!((denied.tokens - 0.2).abs() < 1e-9);

        // The denial advanced last_refill: asking again at the same
        // timestamp accrues nothing further.
        let again = store.bucket_update("b", &cmd(1_000.2)).await.unwrap();
        assert!(!again.allowed);
        assert!((again.tokens - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn idle_bucket_expires_via_ttl() {
        let (clock, store) = manual_store();
        for _ in 0..10 {
            store.bucket_update("b", &cmd(1_000.0)).await.unwrap();
        }

        // Past the bucket TTL the identity is forgotten and starts full.
        clock.advance(121.0);
        let outcome = store.bucket_update("b", &cmd(1_121.0)).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.tokens, 9.0);
    }

    #[tokio::test]
    async fn unreachable_fails_every_operation() {
        let (_, store) = manual_store();
        store.set_unreachable(true);

        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.set("k", b"v", Duration::from_secs(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.incr("n").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.bucket_update("b", &cmd(1_000.0)).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unreachable(false);
        assert!(store.get("k").await.is_ok());
    }
}
