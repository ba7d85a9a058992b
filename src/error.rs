//! Heimdall error types

/// Heimdall error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    /// A collaborator passed malformed input (empty identity, zero cost,
    /// zero TTL). A programming error at the call site, not a runtime
    /// condition — never produced by store failures.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("no fast store configured")]
    NoStore,

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
