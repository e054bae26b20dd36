//! Error types for the redlimit engine.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for redlimit operations.
#[derive(Error, Debug)]
pub enum RedlimitError {
    /// The caller has used up its quota for the current interval.
    #[error("Rate limit exceeded for key {key}")]
    QuotaExceeded { key: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared counter store could not answer the quota check.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedlimitError {
    /// Whether this error is a quota rejection rather than a failure.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, RedlimitError::QuotaExceeded { .. })
    }

    /// Conventional HTTP status a host framework can answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            RedlimitError::QuotaExceeded { .. } => 429,
            RedlimitError::StoreUnavailable(_) => 503,
            RedlimitError::Config(_) | RedlimitError::Io(_) => 500,
        }
    }
}

/// Result type alias for redlimit operations.
pub type Result<T> = std::result::Result<T, RedlimitError>;
