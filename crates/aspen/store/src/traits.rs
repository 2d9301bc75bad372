//! Persistence boundary of the engine.
//!
//! Evaluation events and action executions are append-only; nothing in the
//! engine ever mutates a written record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aspen_types::{
    ActionExecutionRecord, Agent, AgentId, Connection, ConnectionId, DateRange, Entity, EntityId,
    EntityState, EvaluationEvent, HistoricalObservations, ObservationSet, Scope, WorkspaceId,
};

use crate::error::Result;

/// CRUD over supervision agents.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn create(&self, agent: &Agent) -> Result<()>;

    async fn get(&self, id: &AgentId) -> Result<Option<Agent>>;

    async fn update(&self, agent: &Agent) -> Result<()>;

    async fn delete(&self, id: &AgentId) -> Result<()>;

    async fn list_workspace(&self, workspace_id: &WorkspaceId) -> Result<Vec<Agent>>;

    /// All agents in `active` status, across workspaces. The engine applies
    /// schedule matching on top of this.
    async fn list_active(&self) -> Result<Vec<Agent>>;
}

/// Per-(agent, entity) machine state rows.
#[async_trait]
pub trait EntityStateRepository: Send + Sync {
    async fn get(&self, agent_id: &AgentId, entity_id: &EntityId) -> Result<Option<EntityState>>;

    /// Insert or replace the row for the pair.
    async fn upsert(&self, state: &EntityState) -> Result<()>;

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<EntityState>>;

    /// Remove all rows for an agent. Returns the number removed.
    async fn delete_for_agent(&self, agent_id: &AgentId) -> Result<usize>;
}

/// The synced catalog of platform entities. Scope resolution is always a
/// live query so newly created entities are picked up automatically.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    async fn get(&self, id: &EntityId) -> Result<Option<Entity>>;

    async fn list_by_scope(&self, workspace_id: &WorkspaceId, scope: &Scope)
        -> Result<Vec<Entity>>;
}

/// Platform connection lookups.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>>;
}

/// Append-only audit store plus the aggregate queries the safety guards
/// need.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_evaluation(&self, event: &EvaluationEvent) -> Result<()>;

    async fn append_action_execution(&self, record: &ActionExecutionRecord) -> Result<()>;

    /// Most recent evaluation events for an agent, newest first.
    async fn recent_evaluations(&self, agent_id: &AgentId, limit: usize)
        -> Result<Vec<EvaluationEvent>>;

    /// Executed (non-skipped, successful) mutating actions for an entity
    /// since the given instant.
    async fn executed_action_count_for_entity(
        &self,
        entity_id: &EntityId,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Executed mutating actions for an agent since the given instant.
    async fn executed_action_count_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Executed mutating actions for a workspace since the given instant.
    async fn executed_action_count_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// Sum of positive budget deltas attributed to an agent since the given
    /// instant, in currency units.
    async fn budget_increase_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<f64>;
}

/// Time-bucketed per-entity metrics, queried from the ingestion pipeline's
/// store.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Summed observations for the given entities over the window. Per
    /// (entity, date) bucket only the most recently captured snapshot
    /// participates, so intra-day resyncs never double count.
    async fn observations(
        &self,
        entity_ids: &[EntityId],
        window: DateRange,
    ) -> Result<ObservationSet>;

    /// Per-date metric maps over the window, summed across the given
    /// entities with the same latest-snapshot rule. Used as
    /// change-condition references.
    async fn historical(
        &self,
        entity_ids: &[EntityId],
        window: DateRange,
    ) -> Result<HistoricalObservations>;
}
