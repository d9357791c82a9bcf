//! Error types for tiered-memory

use thiserror::Error;

/// Result type alias for tiered-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tiered-memory
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Trace mismatch in scenario '{scenario}' at step {step}: {detail}")]
    TraceMismatch {
        scenario: String,
        step: usize,
        detail: String,
    },
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Whether the caller sent something the store cannot accept
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidInput(_) | Self::Config(_)
        )
    }
}

/// Map a poisoned lock into a storage error
pub(crate) fn poisoned<T>(err: std::sync::PoisonError<T>) -> Error {
    Error::storage(format!("lock poisoned: {}", err))
}
