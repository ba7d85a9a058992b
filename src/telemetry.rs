//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `tier` — rate-limit tier: "authenticated" or "anonymous"
//! - `outcome` — admission outcome: "allowed", "denied", or "degraded"
//! - `operation` — store operation: "get", "set", "incr", "bucket_update"

/// Total rate-limit decisions made.
///
/// Labels: `tier`, `outcome` ("allowed" | "denied" | "degraded").
pub const RATE_DECISIONS_TOTAL: &str = "heimdall_rate_decisions_total";

/// Total query-cache hits.
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total query-cache misses (absent entries and store errors both count).
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total tenant-version invalidations applied.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "heimdall_cache_invalidations_total";

/// Total fast-store failures absorbed by the fail-open / miss boundaries.
///
/// Labels: `operation`.
pub const STORE_ERRORS_TOTAL: &str = "heimdall_store_errors_total";
