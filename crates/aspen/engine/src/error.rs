//! Error types for aspen-engine.

use aspen_types::AgentId;
use thiserror::Error;

/// Errors surfaced by the orchestrator.
///
/// Per-entity evaluation failures never reach this type; they are caught at
/// the unit boundary, recorded as error events, and counted on the pair.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] aspen_store::StoreError),

    /// A guard consultation failed underneath.
    #[error("guard error: {0}")]
    Guard(#[from] aspen_guard::GuardError),

    /// Observation fetch exceeded its deadline.
    #[error("observation fetch timed out after {0}s")]
    ObservationTimeout(u64),

    /// Agent does not exist.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// The engine was assembled without a required dependency.
    #[error("engine misconfigured: {0}")]
    Misconfigured(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
