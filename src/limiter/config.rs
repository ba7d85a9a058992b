//! Rate-limiter tiers and configuration.

use std::time::Duration;

use serde::Deserialize;

/// Admission tier for a caller.
///
/// Authenticated callers get the larger bucket; anonymous callers (keyed
/// by network address) get the smaller one. The tier's limits are fixed at
/// configuration time and never mutate once a bucket exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Authenticated,
    Anonymous,
}

impl Tier {
    /// Stable lowercase name, used in bucket keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Authenticated => "authenticated",
            Tier::Anonymous => "anonymous",
        }
    }
}

/// Capacity and window for one tier.
///
/// Tokens refill continuously at `capacity / window_secs` per second up to
/// `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TierLimits {
    /// Maximum burst size in tokens.
    pub capacity: f64,
    /// Window over which a full bucket's worth of tokens accrues.
    pub window_secs: f64,
}

impl TierLimits {
    /// Construct limits of `capacity` tokens per `window_secs` seconds.
    pub fn new(capacity: f64, window_secs: f64) -> Self {
        Self {
            capacity,
            window_secs,
        }
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.capacity / self.window_secs
    }

    /// The window as a [`Duration`], for response metadata.
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_authenticated() -> TierLimits {
    TierLimits::new(120.0, 60.0)
}

fn default_anonymous() -> TierLimits {
    TierLimits::new(30.0, 60.0)
}

fn default_bucket_ttl_secs() -> u64 {
    120
}

/// Rate limiter configuration.
///
/// ```rust
/// # use heimdall::limiter::{LimiterConfig, TierLimits};
/// let config = LimiterConfig::new()
///     .authenticated(TierLimits::new(240.0, 60.0))
///     .bucket_ttl_secs(300);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Master switch; when false every request is admitted without a
    /// store round-trip.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Limits for authenticated callers (default: 120 tokens / 60 s).
    #[serde(default = "default_authenticated")]
    pub authenticated: TierLimits,
    /// Limits for anonymous callers (default: 30 tokens / 60 s).
    #[serde(default = "default_anonymous")]
    pub anonymous: TierLimits,
    /// Idle-bucket expiry in seconds (default: 120, twice the window).
    /// Refreshed on every check, so only truly idle identities expire.
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            authenticated: default_authenticated(),
            anonymous: default_anonymous(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
        }
    }
}

impl LimiterConfig {
    /// Create a config with the default tiers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable admission control.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the authenticated tier's limits.
    pub fn authenticated(mut self, limits: TierLimits) -> Self {
        self.authenticated = limits;
        self
    }

    /// Set the anonymous tier's limits.
    pub fn anonymous(mut self, limits: TierLimits) -> Self {
        self.anonymous = limits;
        self
    }

    /// Set the idle-bucket expiry in seconds.
    pub fn bucket_ttl_secs(mut self, secs: u64) -> Self {
        self.bucket_ttl_secs = secs;
        self
    }

    /// Limits for a tier.
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Authenticated => self.authenticated,
            Tier::Anonymous => self.anonymous,
        }
    }

    /// Bucket TTL as a [`Duration`].
    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_match_contract() {
        let config = LimiterConfig::default();
        assert!(config.enabled);
        assert_eq!(config.authenticated.capacity, 120.0);
        assert_eq!(config.anonymous.capacity, 30.0);
        assert_eq!(config.authenticated.refill_rate(), 2.0);
        assert_eq!(config.anonymous.refill_rate(), 0.5);
        assert_eq!(config.bucket_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn limits_selects_by_tier() {
        let config = LimiterConfig::new()
            .authenticated(TierLimits::new(10.0, 5.0))
            .anonymous(TierLimits::new(2.0, 5.0));
        assert_eq!(config.limits(Tier::Authenticated).capacity, 10.0);
        assert_eq!(config.limits(Tier::Anonymous).capacity, 2.0);
    }

    #[test]
    fn tier_names_are_stable() {
        assert_eq!(Tier::Authenticated.as_str(), "authenticated");
        assert_eq!(Tier::Anonymous.as_str(), "anonymous");
    }
}
