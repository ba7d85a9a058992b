//! Token-bucket admission control.
//!
//! One [`RateLimiter::check_and_consume`] call makes the whole
//! accept/reject decision for a request: a single round-trip to the fast
//! store runs the atomic refill-and-consume procedure
//! ([`FastStore::bucket_update`]), so concurrent requests for the same
//! identity can never double-spend a token or double-apply a refill. The
//! limiter itself holds no mutable state — any number of server instances
//! sharing one store stay coordinated.
//!
//! # Fail-open
//!
//! Admission control is a protective control, not a correctness-critical
//! one. When the store is unreachable the limiter admits the request,
//! flags [`Decision::degraded`], and records the failure on the shared
//! [`StoreHealth`] signal instead of turning a store outage into a full
//! API outage.

mod config;
mod identity;

pub use config::{LimiterConfig, Tier, TierLimits};
pub use identity::Identity;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::clock::Clock;
use crate::health::StoreHealth;
use crate::store::{BucketCommand, FastStore};
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Tolerance for float drift when checking the bucket invariant.
const BALANCE_EPSILON: f64 = 1e-6;

/// Outcome of one admission check.
///
/// `limit` and `window` mirror the tier's configuration so the middleware
/// can attach standard rate-limit headers; `retry_after` is populated on
/// denial for a `Retry-After` header alongside the 429-equivalent status.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Tokens left after this request, rounded down. Display value only —
    /// the admission decision uses the un-rounded balance.
    pub remaining: u64,
    /// On denial, how long until one token (or the requested cost) has
    /// accrued.
    pub retry_after: Option<Duration>,
    /// The tier's burst capacity.
    pub limit: u64,
    /// The tier's refill window.
    pub window: Duration,
    /// True when the store was unreachable and the limiter failed open.
    pub degraded: bool,
}

/// Per-identity token-bucket rate limiter over the fast store.
pub struct RateLimiter {
    store: Arc<dyn FastStore>,
    clock: Arc<dyn Clock>,
    config: LimiterConfig,
    health: StoreHealth,
}

impl RateLimiter {
    /// Create a limiter. Prefer wiring through
    /// [`Heimdall::builder()`](crate::Heimdall::builder), which shares the
    /// health signal with the query cache.
    pub fn new(
        store: Arc<dyn FastStore>,
        clock: Arc<dyn Clock>,
        config: LimiterConfig,
        health: StoreHealth,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            health,
        }
    }

    /// The shared degraded-mode signal.
    pub fn health(&self) -> &StoreHealth {
        &self.health
    }

    /// Check whether `identity` may proceed, consuming one token.
    ///
    /// Exactly one store round-trip. An empty identity is rejected as
    /// [`HeimdallError::InvalidInput`]; store failures never surface as
    /// errors (see module docs on fail-open).
    pub async fn check_and_consume(&self, identity: &str, tier: Tier) -> Result<Decision> {
        self.check_and_consume_n(identity, tier, 1).await
    }

    /// Weighted variant of [`check_and_consume`](Self::check_and_consume):
    /// consume `cost` tokens at once (bulk endpoints charge more than
    /// single-record ones). `cost` must be at least 1.
    pub async fn check_and_consume_n(
        &self,
        identity: &str,
        tier: Tier,
        cost: u32,
    ) -> Result<Decision> {
        if identity.trim().is_empty() {
            return Err(HeimdallError::InvalidInput(
                "identity must be non-empty".into(),
            ));
        }
        if cost == 0 {
            return Err(HeimdallError::InvalidInput(
                "cost must be at least 1".into(),
            ));
        }

        let limits = self.config.limits(tier);
        if !self.config.enabled {
            return Ok(self.open_decision(tier, limits, false));
        }

        let cmd = BucketCommand {
            capacity: limits.capacity,
            refill_rate: limits.refill_rate(),
            now: self.clock.now(),
            requested: f64::from(cost),
            ttl: self.config.bucket_ttl(),
        };
        let key = bucket_key(tier, identity);

        let outcome = match self.store.bucket_update(&key, &cmd).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(identity, tier = tier.as_str(), error = %e,
                    "rate limit check failed, admitting request");
                metrics::counter!(telemetry::STORE_ERRORS_TOTAL,
                    "operation" => "bucket_update")
                .increment(1);
                self.health.record_failure(&e);
                return Ok(self.open_decision(tier, limits, true));
            }
        };
        self.health.record_success();

        // Balance outside [0, capacity] should be unreachable given the
        // atomic update; do not trust it for an allow.
        if outcome.tokens < -BALANCE_EPSILON || outcome.tokens > limits.capacity + BALANCE_EPSILON {
            error!(identity, tier = tier.as_str(), tokens = outcome.tokens,
                capacity = limits.capacity, "bucket balance outside [0, capacity], denying");
            metrics::counter!(telemetry::RATE_DECISIONS_TOTAL,
                "tier" => tier.as_str(), "outcome" => "denied")
            .increment(1);
            return Ok(Decision {
                allowed: false,
                remaining: 0,
                retry_after: Some(Duration::from_secs_f64(1.0 / limits.refill_rate())),
                limit: limits.capacity as u64,
                window: limits.window(),
                degraded: false,
            });
        }

        let decision = if outcome.allowed {
            Decision {
                allowed: true,
                remaining: outcome.tokens.floor() as u64,
                retry_after: None,
                limit: limits.capacity as u64,
                window: limits.window(),
                degraded: false,
            }
        } else {
            let deficit = f64::from(cost) - outcome.tokens;
            Decision {
                allowed: false,
                remaining: 0,
                retry_after: Some(Duration::from_secs_f64(deficit / limits.refill_rate())),
                limit: limits.capacity as u64,
                window: limits.window(),
                degraded: false,
            }
        };

        let outcome_label = if decision.allowed { "allowed" } else { "denied" };
        metrics::counter!(telemetry::RATE_DECISIONS_TOTAL,
            "tier" => tier.as_str(), "outcome" => outcome_label)
        .increment(1);

        Ok(decision)
    }

    /// Unconditional-allow decision, used when limiting is disabled or the
    /// store is unreachable. `remaining` reports the full capacity: with no
    /// bucket state to consult there is nothing truer to display.
    fn open_decision(&self, tier: Tier, limits: TierLimits, degraded: bool) -> Decision {
        if degraded {
            metrics::counter!(telemetry::RATE_DECISIONS_TOTAL,
                "tier" => tier.as_str(), "outcome" => "degraded")
            .increment(1);
        }
        Decision {
            allowed: true,
            remaining: limits.capacity as u64,
            retry_after: None,
            limit: limits.capacity as u64,
            window: limits.window(),
            degraded,
        }
    }
}

/// Bucket key for `(tier, identity)`. The tier is part of the key so a
/// caller seen under both tiers gets two independent buckets.
fn bucket_key(tier: Tier, identity: &str) -> String {
    format!("ratelimit:{}:{}", tier.as_str(), identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{BucketOutcome, MemoryStore, StoreError};
    use async_trait::async_trait;

    fn limiter_with(
        config: LimiterConfig,
    ) -> (Arc<ManualClock>, Arc<MemoryStore>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(
            store.clone(),
            clock.clone(),
            config,
            StoreHealth::new(),
        );
        (clock, store, limiter)
    }

    #[tokio::test]
    async fn empty_identity_is_invalid_input() {
        let (_, _, limiter) = limiter_with(LimiterConfig::default());
        let err = limiter.check_and_consume("", Tier::Anonymous).await;
        assert!(matches!(err, Err(HeimdallError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn zero_cost_is_invalid_input() {
        let (_, _, limiter) = limiter_with(LimiterConfig::default());
        let err = limiter
            .check_and_consume_n("user:a", Tier::Anonymous, 0)
            .await;
        assert!(matches!(err, Err(HeimdallError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn disabled_limiter_always_admits() {
        let (_, store, limiter) = limiter_with(LimiterConfig::new().enabled(false));
        for _ in 0..500 {
            let decision = limiter
                .check_and_consume("user:a", Tier::Anonymous)
                .await
                .unwrap();
            assert!(decision.allowed);
            assert!(!decision.degraded);
        }
        // No store traffic at all when disabled
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn denial_reports_time_to_one_token() {
        let config = LimiterConfig::new().anonymous(TierLimits::new(2.0, 4.0)); // 0.5 tokens/s
        let (_, _, limiter) = limiter_with(config);

        limiter.check_and_consume("ip:x", Tier::Anonymous).await.unwrap();
        limiter.check_and_consume("ip:x", Tier::Anonymous).await.unwrap();
        let denied = limiter
            .check_and_consume("ip:x", Tier::Anonymous)
            .await
            .unwrap();

        assert!(!denied.allowed);
        // Empty bucket, rate 0.5/s: one token takes 2 s
        let retry = denied.retry_after.unwrap();
        assert!((retry.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn weighted_cost_drains_faster() {
        let config = LimiterConfig::new().anonymous(TierLimits::new(10.0, 60.0));
        let (_, _, limiter) = limiter_with(config);

        let first = limiter
            .check_and_consume_n("ip:x", Tier::Anonymous, 8)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);

        let second = limiter
            .check_and_consume_n("ip:x", Tier::Anonymous, 8)
            .await
            .unwrap();
        assert!(!second.allowed);
    }

    #[tokio::test]
    async fn tiers_use_independent_buckets() {
        let config = LimiterConfig::new()
            .anonymous(TierLimits::new(1.0, 60.0))
            .authenticated(TierLimits::new(1.0, 60.0));
        let (_, _, limiter) = limiter_with(config);

        assert!(
            limiter
                .check_and_consume("x", Tier::Anonymous)
                .await
                .unwrap()
                .allowed
        );
        // Same identity string under the other tier still has its token
        assert!(
            limiter
                .check_and_consume("x", Tier::Authenticated)
                .await
                .unwrap()
                .allowed
        );
        // But the anonymous bucket is now empty
        assert!(
            !limiter
                .check_and_consume("x", Tier::Anonymous)
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn decision_carries_header_metadata() {
        let (_, _, limiter) = limiter_with(LimiterConfig::default());
        let decision = limiter
            .check_and_consume("user:a", Tier::Authenticated)
            .await
            .unwrap();
        assert_eq!(decision.limit, 120);
        assert_eq!(decision.window, Duration::from_secs(60));
        assert_eq!(decision.remaining, 119);
    }

    /// Store that reports an impossible balance, for the invariant path.
    struct CorruptBucketStore;

    #[async_trait]
    impl FastStore for CorruptBucketStore {
        async fn get(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        async fn set(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn incr(&self, _key: &str) -> std::result::Result<i64, StoreError> {
            Ok(1)
        }

        async fn bucket_update(
            &self,
            _key: &str,
            cmd: &BucketCommand,
        ) -> std::result::Result<BucketOutcome, StoreError> {
            Ok(BucketOutcome {
                allowed: true,
                tokens: cmd.capacity + 5.0,
            })
        }
    }

    #[tokio::test]
    async fn impossible_balance_is_denied_not_trusted() {
        let limiter = RateLimiter::new(
            Arc::new(CorruptBucketStore),
            Arc::new(ManualClock::new(0.0)),
            LimiterConfig::default(),
            StoreHealth::new(),
        );

        let decision = limiter
            .check_and_consume("user:a", Tier::Authenticated)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after.is_some());
        assert!(!decision.degraded);
    }
}
