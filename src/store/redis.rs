//! Redis-backed fast store.
//!
//! Production [`FastStore`] adapter over the `redis` crate's multiplexed
//! [`ConnectionManager`] (cloneable, auto-reconnecting). The token-bucket
//! procedure runs as a Lua script so the whole read-refill-decide-write
//! sequence evaluates atomically on the server — [`redis::Script`] handles
//! `EVALSHA` with a transparent `EVAL` fallback when the script is not yet
//! cached.
//!
//! The script returns the post-update balance as a string: Lua-to-Redis
//! conversion truncates numbers to integers, which would discard the
//! fractional tokens the refill math depends on.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use super::{BucketCommand, BucketOutcome, FastStore, StoreError};

/// Atomic refill-and-consume procedure, evaluated server-side.
///
/// KEYS[1] bucket key; ARGV: capacity, refill rate (tokens/s), now (epoch
/// seconds), requested tokens, ttl (seconds). Returns `{allowed, tokens}`.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or capacity
local last_refill = tonumber(bucket[2]) or now

local elapsed = now - last_refill
if elapsed < 0 then
    elapsed = 0
end
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
end

redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', key, ttl)
return {allowed, tostring(tokens)}
"#;

/// [`FastStore`] adapter over a Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
    bucket_script: Script,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        Ok(Self::from_connection(conn))
    }

    /// Build from an existing connection manager (shared pools).
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

fn map_err(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Data(e.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Round sub-second TTLs up so they are not silently immortal (Redis
    // EXPIRE 0 deletes the key) or instantly gone.
    ttl.as_secs().max(1)
}

#[async_trait]
impl FastStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(key, 1).await.map_err(map_err)
    }

    async fn bucket_update(
        &self,
        key: &str,
        cmd: &BucketCommand,
    ) -> Result<BucketOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let (allowed, tokens): (i64, String) = self
            .bucket_script
            .key(key)
            .arg(cmd.capacity)
            .arg(cmd.refill_rate)
            .arg(cmd.now)
            .arg(cmd.requested)
            .arg(ttl_secs(cmd.ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        let tokens = tokens
            .parse::<f64>()
            .map_err(|e| StoreError::Data(format!("bucket script returned {tokens:?}: {e}")))?;

        Ok(BucketOutcome {
            allowed: allowed == 1,
            tokens,
        })
    }
}
