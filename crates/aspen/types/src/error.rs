//! Validation errors for agent configuration.

use thiserror::Error;

/// Errors raised when validating user-supplied agent configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Condition tree is structurally invalid.
    #[error("invalid condition: {0}")]
    Condition(String),

    /// Accumulation settings are inconsistent.
    #[error("invalid accumulation config: {0}")]
    Accumulation(String),

    /// Trigger settings are inconsistent.
    #[error("invalid trigger config: {0}")]
    Trigger(String),

    /// Schedule settings are out of range.
    #[error("invalid schedule: {0}")]
    Schedule(String),

    /// Action configuration is invalid.
    #[error("invalid action config: {0}")]
    Action(String),

    /// Scope definition is invalid.
    #[error("invalid scope: {0}")]
    Scope(String),
}
