//! Error types for aspen-guard.

use thiserror::Error;

/// Errors raised while consulting the guards. A blocked action is not an
/// error; these cover storage failures underneath the checks.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] aspen_store::StoreError),
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;
