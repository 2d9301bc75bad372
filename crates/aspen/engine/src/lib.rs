//! The ASPEN evaluation orchestrator.
//!
//! Drives supervision cycles: selects due agents, resolves scopes live,
//! fetches observations, runs the condition evaluator and accumulation
//! machine, consults the safety guards, dispatches actions, and persists
//! append-only evaluation events. Per-(agent, entity) evaluation is
//! serialized by an in-process lock map; entities within an agent run
//! concurrently.

pub mod builder;
pub mod config;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod schedule;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use orchestrator::{CycleReport, Orchestrator};
pub use schedule::is_due;
