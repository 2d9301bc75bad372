//! Error types for aspen-store.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Item not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data failed to (de)serialize.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Backend connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query failure.
    #[error("query error: {0}")]
    Query(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
