//! Core types for the ASPEN campaign supervision engine.
//!
//! This crate defines the shared vocabulary of the engine: strongly-typed
//! identifiers, the agent model (conditions, accumulation, triggers, scope,
//! schedule, actions), per-pair entity state, append-only evaluation events,
//! and observation data. It is dependency-light and contains no I/O.

pub mod agent;
pub mod condition;
pub mod entity;
pub mod error;
pub mod event;
pub mod ids;
pub mod observation;
pub mod provider;

pub use agent::{
    AccumulationConfig, AccumulationMode, ActionConfig, Agent, AgentStatus, CountUnit,
    NotificationKind, Schedule, ScheduleTime, Scope, TriggerConfig, TriggerMode,
};
pub use condition::{ChangeDirection, ComparisonOp, Condition, LogicalOp, ReferencePeriod};
pub use entity::{
    AccumulationSnapshot, Connection, Entity, EntityState, MachineState, MET_HISTORY_CAP,
};
pub use error::ValidationError;
pub use event::{
    ActionExecutionRecord, ActionResult, EvaluationEvent, EvaluationOutcome, RollbackPayload,
};
pub use ids::{AgentId, ConnectionId, EntityId, EventId, WorkspaceId};
pub use observation::{
    sum_latest_snapshots, DateRange, HistoricalObservations, MetricSnapshot, ObservationSet,
};
pub use provider::{BudgetKind, EntityLevel, EntityStatus, Provider};
