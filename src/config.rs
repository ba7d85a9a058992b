//! Embedding configuration.
//!
//! [`Config`] aggregates the per-subsystem configs so an embedding service
//! can deserialize one `[rate_limiter]` / `[cache]` TOML table pair and
//! hand the result to [`Heimdall::builder()`](crate::Heimdall::builder).
//! Every field has a default; an empty config is a fully working setup.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::limiter::LimiterConfig;

/// Top-level configuration for both subsystems.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rate_limiter: LimiterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}
