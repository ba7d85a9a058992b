//! Caller identity keys.
//!
//! The middleware resolves who is calling (user id from the session, or the
//! client address for anonymous traffic) — this module only gives those
//! values a stable key form so the same caller always lands on the same
//! bucket. `user:` and `ip:` prefixes keep the two namespaces disjoint:
//! a user literally named `192.0.2.1` cannot collide with that address.

use std::fmt;
use std::net::IpAddr;

use crate::{HeimdallError, Result};

/// A validated, stable rate-limiting key for one caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap a pre-formed identity string. Rejects empty input.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(HeimdallError::InvalidInput(
                "identity must be non-empty".into(),
            ));
        }
        Ok(Self(raw))
    }

    /// Identity for an authenticated user: `user:{id}`.
    pub fn user(id: &str) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(HeimdallError::InvalidInput(
                "user id must be non-empty".into(),
            ));
        }
        Ok(Self(format!("user:{id}")))
    }

    /// Identity for an anonymous caller keyed by address: `ip:{addr}`.
    pub fn ip(addr: IpAddr) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
