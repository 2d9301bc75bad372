//! PostgreSQL storage implementation.
//!
//! Rows carry a JSONB `data` document plus the key columns the engine
//! queries on. Schema bootstrap is idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;

use aspen_types::{
    ActionExecutionRecord, Agent, AgentId, AgentStatus, Connection, ConnectionId, Entity,
    EntityId, EntityState, EvaluationEvent, Scope, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    AgentRepository, ConnectionRepository, EntityCatalog, EntityStateRepository, EventStore,
};

/// PostgreSQL-backed storage.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and initialize the schema.
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Storage sharing an existing pool (tests, embedded use).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id UUID PRIMARY KEY,
                workspace_id UUID NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS agents_workspace_id ON agents(workspace_id);"#,
            r#"CREATE INDEX IF NOT EXISTS agents_status ON agents(status);"#,
            r#"
            CREATE TABLE IF NOT EXISTS entity_states (
                agent_id UUID NOT NULL,
                entity_id TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (agent_id, entity_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                workspace_id UUID NOT NULL,
                provider TEXT NOT NULL,
                level TEXT NOT NULL,
                name TEXT NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS entities_workspace_id ON entities(workspace_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id UUID PRIMARY KEY,
                workspace_id UUID NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS evaluation_events (
                id UUID PRIMARY KEY,
                agent_id UUID NOT NULL,
                workspace_id UUID NOT NULL,
                entity_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS evaluation_events_agent ON evaluation_events(agent_id, created_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS action_executions (
                id UUID PRIMARY KEY,
                event_id UUID NOT NULL,
                agent_id UUID NOT NULL,
                workspace_id UUID NOT NULL,
                entity_id TEXT NOT NULL,
                skipped BOOLEAN NOT NULL,
                success BOOLEAN NOT NULL,
                budget_delta DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS action_executions_agent ON action_executions(agent_id, created_at DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS action_executions_entity ON action_executions(entity_id, created_at DESC);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
        serde_json::to_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| StoreError::InvalidData(format!("json deserialize error: {}", e)))
    }
}

#[async_trait]
impl AgentRepository for PostgresStore {
    async fn create(&self, agent: &Agent) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO agents (id, workspace_id, status, data, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(agent.id.as_uuid())
        .bind(agent.workspace_id.as_uuid())
        .bind(agent.status.to_string())
        .bind(Self::to_json(agent)?)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("agent {} exists", agent.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT data FROM agents WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn update(&self, agent: &Agent) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = $2, data = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(agent.id.as_uuid())
        .bind(agent.status.to_string())
        .bind(Self::to_json(agent)?)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("agent {}", agent.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM entity_states WHERE agent_id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list_workspace(&self, workspace_id: &WorkspaceId) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT data FROM agents WHERE workspace_id = $1")
            .bind(workspace_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn list_active(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT data FROM agents WHERE status = $1")
            .bind(AgentStatus::Active.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }
}

#[async_trait]
impl EntityStateRepository for PostgresStore {
    async fn get(&self, agent_id: &AgentId, entity_id: &EntityId) -> Result<Option<EntityState>> {
        let row = sqlx::query(
            "SELECT data FROM entity_states WHERE agent_id = $1 AND entity_id = $2",
        )
        .bind(agent_id.as_uuid())
        .bind(entity_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn upsert(&self, state: &EntityState) -> Result<()> {
        sqlx::query(
            "INSERT INTO entity_states (agent_id, entity_id, data, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (agent_id, entity_id) DO UPDATE
             SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
        )
        .bind(state.agent_id.as_uuid())
        .bind(state.entity_id.as_str())
        .bind(Self::to_json(state)?)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<EntityState>> {
        let rows = sqlx::query("SELECT data FROM entity_states WHERE agent_id = $1")
            .bind(agent_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn delete_for_agent(&self, agent_id: &AgentId) -> Result<usize> {
        let result = sqlx::query("DELETE FROM entity_states WHERE agent_id = $1")
            .bind(agent_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl EntityCatalog for PostgresStore {
    async fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT data FROM entities WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn list_by_scope(
        &self,
        workspace_id: &WorkspaceId,
        scope: &Scope,
    ) -> Result<Vec<Entity>> {
        // Key-column filters narrow the candidate set; exact scope matching
        // (explicit ID lists, name search) happens on the decoded rows.
        let rows = match scope {
            Scope::All { provider, level } => {
                sqlx::query(
                    "SELECT data FROM entities
                     WHERE workspace_id = $1 AND provider = $2 AND level = $3
                     ORDER BY id",
                )
                .bind(workspace_id.as_uuid())
                .bind(provider.to_string())
                .bind(level.to_string())
                .fetch_all(&self.pool)
                .await
            }
            _ => {
                sqlx::query("SELECT data FROM entities WHERE workspace_id = $1 ORDER BY id")
                    .bind(workspace_id.as_uuid())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let entities: Vec<Entity> = rows
            .into_iter()
            .map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .collect::<Result<_>>()?;

        Ok(entities
            .into_iter()
            .filter(|entity| match scope {
                Scope::All { .. } => true,
                Scope::Entities { ids } => ids.contains(&entity.id),
                Scope::Filter {
                    provider,
                    level,
                    name_contains,
                } => {
                    provider.map_or(true, |p| entity.provider == p)
                        && level.map_or(true, |l| entity.level == l)
                        && name_contains.as_ref().map_or(true, |needle| {
                            entity.name.to_lowercase().contains(&needle.to_lowercase())
                        })
                }
            })
            .collect())
    }
}

#[async_trait]
impl ConnectionRepository for PostgresStore {
    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        let row = sqlx::query("SELECT data FROM connections WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn append_evaluation(&self, event: &EvaluationEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO evaluation_events (id, agent_id, workspace_id, entity_id, created_at, data)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id.as_uuid())
        .bind(event.agent_id.as_uuid())
        .bind(event.workspace_id.as_uuid())
        .bind(event.entity_id.as_str())
        .bind(event.created_at)
        .bind(Self::to_json(event)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn append_action_execution(&self, record: &ActionExecutionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_executions
             (id, event_id, agent_id, workspace_id, entity_id, skipped, success,
              budget_delta, created_at, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id.as_uuid())
        .bind(record.event_id.as_uuid())
        .bind(record.agent_id.as_uuid())
        .bind(record.workspace_id.as_uuid())
        .bind(record.entity_id.as_str())
        .bind(record.skipped)
        .bind(record.success)
        .bind(record.budget_delta)
        .bind(record.created_at)
        .bind(Self::to_json(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn recent_evaluations(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<EvaluationEvent>> {
        let rows = sqlx::query(
            "SELECT data FROM evaluation_events
             WHERE agent_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(agent_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|r| Self::from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn executed_action_count_for_entity(
        &self,
        entity_id: &EntityId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM action_executions
             WHERE entity_id = $1 AND NOT skipped AND created_at >= $2",
        )
        .bind(entity_id.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn executed_action_count_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM action_executions
             WHERE agent_id = $1 AND NOT skipped AND created_at >= $2",
        )
        .bind(agent_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn executed_action_count_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM action_executions
             WHERE workspace_id = $1 AND NOT skipped AND created_at >= $2",
        )
        .bind(workspace_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn budget_increase_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(budget_delta), 0) AS total FROM action_executions
             WHERE agent_id = $1 AND success AND budget_delta > 0 AND created_at >= $2",
        )
        .bind(agent_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.get::<f64, _>("total"))
    }
}
