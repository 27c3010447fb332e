//! Error types for Agentbox
//!
//! Every error that crosses the public task interface ends up here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Agentbox error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Admission
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capacity reached for {owner}: at most {limit} concurrent tasks")]
    Capacity { owner: String, limit: usize },

    // ========================================================================
    // Lookup / access
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code, safe to show to callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Capacity { .. } => "capacity",
            Error::NotFound(_) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::InvalidState(_) => "invalid_state",
            Error::Config(_) | Error::Toml(_) => "config",
            Error::Storage(_) => "storage",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "internal",
        }
    }

    /// Errors rejected synchronously before any resource is allocated
    pub fn is_admission(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Capacity { .. })
    }

    /// Whether the error can be shown to the caller verbatim
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Capacity { .. }
                | Error::NotFound(_)
                | Error::Forbidden(_)
                | Error::InvalidState(_)
        )
    }

    /// Capacity error helper
    pub fn capacity(owner: impl Into<String>, limit: usize) -> Self {
        Error::Capacity {
            owner: owner.into(),
            limit,
        }
    }
}

// ============================================================================
// From implementations (extra conversions)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
