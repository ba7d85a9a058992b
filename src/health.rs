//! Process-wide degraded-mode signal.
//!
//! When the fast store is unreachable, neither subsystem fails the request:
//! the rate limiter fails open and the query cache degrades to misses. What
//! *does* happen is that [`StoreHealth`] flips to degraded and records the
//! last error, so operators can see that admission control and caching are
//! running unprotected. The flag clears itself on the next successful store
//! round-trip.
//!
//! One `StoreHealth` is shared by both subsystems — the builder creates it
//! and hands out clones (cloning shares the underlying state).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::store::StoreError;

#[derive(Debug, Default)]
struct HealthInner {
    degraded: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Shared observability signal for fast-store reachability.
#[derive(Debug, Clone, Default)]
pub struct StoreHealth {
    inner: Arc<HealthInner>,
}

impl StoreHealth {
    /// Create a fresh signal in the healthy state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last store interaction failed.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Relaxed)
    }

    /// The error message from the most recent store failure, if any.
    ///
    /// Retained after recovery so operators can see what last went wrong.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .expect("health mutex poisoned")
            .clone()
    }

    /// Record a store failure: flip to degraded and remember the error.
    pub fn record_failure(&self, err: &StoreError) {
        self.inner.degraded.store(true, Ordering::Relaxed);
        *self
            .inner
            .last_error
            .lock()
            .expect("health mutex poisoned") = Some(err.to_string());
    }

    /// Record a successful store round-trip, clearing the degraded flag.
    pub fn record_success(&self) {
        self.inner.degraded.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy() {
        let health = StoreHealth::new();
        assert!(!health.is_degraded());
        assert!(health.last_error().is_none());
    }

    #[test]
    fn failure_then_recovery() {
        let health = StoreHealth::new();
        health.record_failure(&StoreError::Unavailable("connection refused".into()));

        assert!(health.is_degraded());
        assert!(health.last_error().unwrap().contains("connection refused"));

        health.record_success();
        assert!(!health.is_degraded());
        // Last error is retained for post-mortems
        assert!(health.last_error().is_some());
    }

    #[test]
    fn clones_share_state() {
        let health = StoreHealth::new();
        let observer = health.clone();

        health.record_failure(&StoreError::Timeout);
        assert!(observer.is_degraded());
    }
}
