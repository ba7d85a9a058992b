//! Fast-store adapter seam.
//!
//! Both subsystems coordinate exclusively through an external atomic
//! key-value store (the "fast store") — never through in-process locks —
//! so that multiple server instances sharing one store stay correct. This
//! module defines the [`FastStore`] contract they require and the adapters
//! that satisfy it:
//!
//! - [`MemoryStore`] — in-process implementation for tests and embedded
//!   single-instance use.
//! - `RedisStore` (feature `redis`) — production backend; the token-bucket
//!   procedure runs as a server-evaluated Lua script.
//! - [`TimeoutStore`] — decorator bounding every call with a short deadline,
//!   applied automatically by the builder.
//!
//! The contract distinguishes "key absent" (`Ok(None)`) from connectivity
//! failure (`Err`), because the callers treat them very differently: absence
//! is a normal domain outcome, failure triggers fail-open / miss behaviour
//! plus the degraded-mode signal.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod timeout;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use timeout::TimeoutStore;

use std::time::Duration;

use async_trait::async_trait;

/// Errors from a fast-store adapter.
///
/// Key absence is **not** an error — `get` returns `Ok(None)`. These
/// variants all mean the store itself misbehaved.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, broken pipe, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its deadline. Treated identically to
    /// [`Unavailable`](Self::Unavailable) by callers.
    #[error("store call timed out")]
    Timeout,

    /// The store answered with something the adapter could not interpret
    /// (wrong type at a key, unparsable counter, script result mismatch).
    #[error("store data error: {0}")]
    Data(String),
}

/// Input to the atomic token-bucket procedure.
///
/// All fields travel to the store in one call so the entire
/// read-refill-decide-write sequence executes there atomically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketCommand {
    /// Maximum tokens the bucket can hold.
    pub capacity: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
    /// Caller's current time in epoch seconds; becomes the bucket's new
    /// `last_refill` stamp.
    pub now: f64,
    /// Tokens to consume if available (usually 1).
    pub requested: f64,
    /// Bucket TTL, refreshed on every update so idle identities expire.
    pub ttl: Duration,
}

/// Result of the atomic token-bucket procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    /// Whether the requested tokens were consumed.
    pub allowed: bool,
    /// Token balance after the update (post-refill, post-consumption).
    pub tokens: f64,
}

/// Contract over the external atomic key-value store.
///
/// Implementations must guarantee that [`incr`](Self::incr) and
/// [`bucket_update`](Self::bucket_update) are atomic with respect to
/// concurrent callers on the same key — no interleaving of two updates
/// for one key is observable. That guarantee is what lets the limiter and
/// cache run lock-free across many server instances.
#[async_trait]
pub trait FastStore: Send + Sync {
    /// Fetch the raw value at `key`. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` at `key` with the given time-to-live.
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> std::result::Result<(), StoreError>;

    /// Atomically increment the integer at `key` by 1, creating it at 1
    /// when absent. Returns the value after the increment.
    async fn incr(&self, key: &str) -> std::result::Result<i64, StoreError>;

    /// Atomically refill the token bucket at `key` and consume
    /// `cmd.requested` tokens if the post-refill balance allows it.
    ///
    /// A missing bucket is initialised full (`tokens = capacity`,
    /// `last_refill = cmd.now`) before the consumption attempt. The refill
    /// bookkeeping persists even when the request is denied.
    async fn bucket_update(
        &self,
        key: &str,
        cmd: &BucketCommand,
    ) -> std::result::Result<BucketOutcome, StoreError>;
}
