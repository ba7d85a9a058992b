//! Heimdall - admission control and versioned query caching
//!
//! This crate provides the two subsystems that sit in front of a
//! record-keeping API's source-of-truth store under concurrent load:
//!
//! - [`RateLimiter`] — per-identity token-bucket admission control. One
//!   atomic round-trip to an external fast store decides accept/reject,
//!   so concurrent requests never double-spend a token. Fails open when
//!   the store is unreachable.
//! - [`QueryCache`] — version-tagged read cache. Bumping one per-tenant
//!   counter makes every previously cached entry unreachable in O(1),
//!   without enumerating or deleting keys.
//!
//! Both coordinate exclusively through the [`FastStore`] trait, so they
//! stay correct across any number of server instances sharing one store.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use heimdall::{Heimdall, MemoryStore, Tier};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> heimdall::Result<()> {
//!     let core = Heimdall::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .build()?;
//!
//!     // Admission middleware: one call per request
//!     let limiter = core.rate_limiter();
//!     let decision = limiter.check_and_consume("user:42", Tier::Authenticated).await?;
//!     assert!(decision.allowed);
//!
//!     // Query service: consult before, populate after the slow read
//!     let cache = core.query_cache();
//!     cache.put("42", "range:2026-01-01..2026-01-07", b"{\"steps\":5000}").await?;
//!     assert!(cache.get("42", "range:2026-01-01..2026-01-07").await?.is_some());
//!
//!     // A committed write orphans everything cached for the tenant
//!     cache.invalidate("42").await?;
//!     assert!(cache.get("42", "range:2026-01-01..2026-01-07").await?.is_none());
//!     Ok(())
//! }
//! ```

mod builder;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use builder::{Heimdall, HeimdallBuilder};
pub use error::{HeimdallError, Result};

pub use cache::{CacheConfig, QueryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use health::StoreHealth;
pub use limiter::{Decision, Identity, LimiterConfig, RateLimiter, Tier, TierLimits};
pub use store::{BucketCommand, BucketOutcome, FastStore, MemoryStore, StoreError, TimeoutStore};

#[cfg(feature = "redis")]
pub use store::RedisStore;
