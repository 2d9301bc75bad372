//! In-memory storage for development and testing.
//!
//! Not suitable for production use; state dies with the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use aspen_types::{
    ActionExecutionRecord, Agent, AgentId, AgentStatus, Connection, ConnectionId, DateRange,
    Entity, EntityId, EntityState, EvaluationEvent, HistoricalObservations, MetricSnapshot,
    ObservationSet, Scope, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    AgentRepository, ConnectionRepository, EntityCatalog, EntityStateRepository, EventStore,
    MetricSource,
};

/// In-memory agent repository.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<DashMap<AgentId, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn create(&self, agent: &Agent) -> Result<()> {
        if self.agents.contains_key(&agent.id) {
            return Err(StoreError::Conflict(format!("agent {} exists", agent.id)));
        }
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.get(id).map(|a| a.clone()))
    }

    async fn update(&self, agent: &Agent) -> Result<()> {
        if !self.agents.contains_key(&agent.id) {
            return Err(StoreError::NotFound(format!("agent {}", agent.id)));
        }
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<()> {
        self.agents.remove(id);
        Ok(())
    }

    async fn list_workspace(&self, workspace_id: &WorkspaceId) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.workspace_id == *workspace_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .map(|a| a.clone())
            .collect())
    }
}

/// In-memory per-pair state rows.
#[derive(Default)]
pub struct InMemoryEntityStateRepository {
    states: Arc<DashMap<(AgentId, EntityId), EntityState>>,
}

impl InMemoryEntityStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStateRepository for InMemoryEntityStateRepository {
    async fn get(&self, agent_id: &AgentId, entity_id: &EntityId) -> Result<Option<EntityState>> {
        Ok(self
            .states
            .get(&(agent_id.clone(), entity_id.clone()))
            .map(|s| s.clone()))
    }

    async fn upsert(&self, state: &EntityState) -> Result<()> {
        self.states.insert(
            (state.agent_id.clone(), state.entity_id.clone()),
            state.clone(),
        );
        Ok(())
    }

    async fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<EntityState>> {
        Ok(self
            .states
            .iter()
            .filter(|entry| entry.key().0 == *agent_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_for_agent(&self, agent_id: &AgentId) -> Result<usize> {
        let keys: Vec<_> = self
            .states
            .iter()
            .filter(|entry| entry.key().0 == *agent_id)
            .map(|entry| entry.key().clone())
            .collect();
        let count = keys.len();
        for key in keys {
            self.states.remove(&key);
        }
        Ok(count)
    }
}

/// In-memory entity catalog.
#[derive(Default)]
pub struct InMemoryEntityCatalog {
    entities: Arc<DashMap<EntityId, Entity>>,
}

impl InMemoryEntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn remove(&self, id: &EntityId) {
        self.entities.remove(id);
    }
}

fn scope_matches(entity: &Entity, scope: &Scope) -> bool {
    match scope {
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
        Scope::All { provider, level } => entity.provider == *provider && entity.level == *level,
    }
}

#[async_trait]
impl EntityCatalog for InMemoryEntityCatalog {
    async fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.entities.get(id).map(|e| e.clone()))
    }

    async fn list_by_scope(
        &self,
        workspace_id: &WorkspaceId,
        scope: &Scope,
    ) -> Result<Vec<Entity>> {
        let mut matched: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.workspace_id == *workspace_id && scope_matches(e, scope))
            .map(|e| e.clone())
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }
}

/// In-memory connection lookups.
#[derive(Default)]
pub struct InMemoryConnectionRepository {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Connection) {
        self.connections.insert(connection.id.clone(), connection);
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn get(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        Ok(self.connections.get(id).map(|c| c.clone()))
    }
}

/// In-memory append-only event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    evaluations: RwLock<Vec<EvaluationEvent>>,
    executions: RwLock<Vec<ActionExecutionRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.read().unwrap().len()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.read().unwrap().len()
    }

    /// All stored evaluations, oldest first. Test helper.
    pub fn all_evaluations(&self) -> Vec<EvaluationEvent> {
        self.evaluations.read().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_evaluation(&self, event: &EvaluationEvent) -> Result<()> {
        self.evaluations.write().unwrap().push(event.clone());
        Ok(())
    }

    async fn append_action_execution(&self, record: &ActionExecutionRecord) -> Result<()> {
        self.executions.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent_evaluations(
        &self,
        agent_id: &AgentId,
        limit: usize,
    ) -> Result<Vec<EvaluationEvent>> {
        let evaluations = self.evaluations.read().unwrap();
        Ok(evaluations
            .iter()
            .rev()
            .filter(|e| e.agent_id == *agent_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn executed_action_count_for_entity(
        &self,
        entity_id: &EntityId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let executions = self.executions.read().unwrap();
        Ok(executions
            .iter()
            .filter(|r| r.entity_id == *entity_id && !r.skipped && r.created_at >= since)
            .count() as u64)
    }

    async fn executed_action_count_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let executions = self.executions.read().unwrap();
        Ok(executions
            .iter()
            .filter(|r| r.agent_id == *agent_id && !r.skipped && r.created_at >= since)
            .count() as u64)
    }

    async fn executed_action_count_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let executions = self.executions.read().unwrap();
        Ok(executions
            .iter()
            .filter(|r| r.workspace_id == *workspace_id && !r.skipped && r.created_at >= since)
            .count() as u64)
    }

    async fn budget_increase_for_agent(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let executions = self.executions.read().unwrap();
        Ok(executions
            .iter()
            .filter(|r| r.agent_id == *agent_id && r.success && r.created_at >= since)
            .filter_map(|r| r.budget_delta)
            .filter(|delta| *delta > 0.0)
            .sum())
    }
}

/// In-memory metric source fed by test fixtures or local ingestion.
#[derive(Default)]
pub struct InMemoryMetricSource {
    snapshots: RwLock<Vec<MetricSnapshot>>,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&self, snapshot: MetricSnapshot) {
        self.snapshots.write().unwrap().push(snapshot);
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn observations(
        &self,
        entity_ids: &[EntityId],
        window: DateRange,
    ) -> Result<ObservationSet> {
        let snapshots = self.snapshots.read().unwrap();
        let relevant: Vec<MetricSnapshot> = snapshots
            .iter()
            .filter(|s| entity_ids.contains(&s.entity_id) && window.contains(s.date))
            .cloned()
            .collect();
        Ok(aspen_types::sum_latest_snapshots(&relevant))
    }

    async fn historical(
        &self,
        entity_ids: &[EntityId],
        window: DateRange,
    ) -> Result<HistoricalObservations> {
        let snapshots = self.snapshots.read().unwrap();

        // Latest snapshot per (entity, date), then sum per date.
        let mut latest: BTreeMap<(EntityId, chrono::NaiveDate), &MetricSnapshot> = BTreeMap::new();
        for snapshot in snapshots
            .iter()
            .filter(|s| entity_ids.contains(&s.entity_id) && window.contains(s.date))
        {
            let key = (snapshot.entity_id.clone(), snapshot.date);
            match latest.get(&key) {
                Some(existing) if existing.captured_at >= snapshot.captured_at => {}
                _ => {
                    latest.insert(key, snapshot);
                }
            }
        }

        let mut per_date: BTreeMap<chrono::NaiveDate, ObservationSet> = BTreeMap::new();
        for ((_, date), snapshot) in latest {
            per_date
                .entry(date)
                .or_default()
                .merge_sum(&ObservationSet::from_metrics(snapshot.metrics.clone()));
        }

        let mut historical = HistoricalObservations::new();
        for (date, mut set) in per_date {
            set.recompute_derived();
            historical.insert_day(date, set.metrics().clone());
        }
        Ok(historical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aspen_types::{ComparisonOp, Condition, EntityLevel, EntityStatus, Provider};
    use chrono::Duration;

    fn agent(workspace_id: WorkspaceId) -> Agent {
        Agent::new(
            workspace_id,
            "test agent",
            Condition::Threshold {
                metric: "spend".into(),
                operator: ComparisonOp::Gt,
                value: 100.0,
            },
            Scope::All {
                provider: Provider::Meta,
                level: EntityLevel::Campaign,
            },
        )
    }

    fn entity(workspace_id: &WorkspaceId, id: &str, name: &str, provider: Provider) -> Entity {
        Entity {
            id: EntityId::new(id),
            workspace_id: workspace_id.clone(),
            provider,
            level: EntityLevel::Campaign,
            name: name.into(),
            status: EntityStatus::Active,
            connection_id: None,
        }
    }

    #[tokio::test]
    async fn test_agent_crud() {
        let repo = InMemoryAgentRepository::new();
        let workspace_id = WorkspaceId::generate();
        let agent = agent(workspace_id.clone());

        repo.create(&agent).await.unwrap();
        assert!(matches!(
            repo.create(&agent).await,
            Err(StoreError::Conflict(_))
        ));

        let loaded = repo.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "test agent");

        assert_eq!(repo.list_workspace(&workspace_id).await.unwrap().len(), 1);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);

        let mut paused = agent.clone();
        paused.status = AgentStatus::Paused;
        repo.update(&paused).await.unwrap();
        assert!(repo.list_active().await.unwrap().is_empty());

        repo.delete(&agent.id).await.unwrap();
        assert!(repo.get(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_catalog_scope_resolution() {
        let catalog = InMemoryEntityCatalog::new();
        let workspace_id = WorkspaceId::generate();
        catalog.insert(entity(&workspace_id, "m1", "Summer Sale", Provider::Meta));
        catalog.insert(entity(&workspace_id, "m2", "Winter Promo", Provider::Meta));
        catalog.insert(entity(&workspace_id, "g1", "Summer Search", Provider::Google));

        let all_meta = catalog
            .list_by_scope(
                &workspace_id,
                &Scope::All {
                    provider: Provider::Meta,
                    level: EntityLevel::Campaign,
                },
            )
            .await
            .unwrap();
        assert_eq!(all_meta.len(), 2);

        let by_name = catalog
            .list_by_scope(
                &workspace_id,
                &Scope::Filter {
                    provider: None,
                    level: None,
                    name_contains: Some("summer".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(by_name.len(), 2);

        let explicit = catalog
            .list_by_scope(
                &workspace_id,
                &Scope::Entities {
                    ids: vec![EntityId::new("g1")],
                },
            )
            .await
            .unwrap();
        assert_eq!(explicit.len(), 1);

        // A different workspace sees nothing.
        let other = catalog
            .list_by_scope(
                &WorkspaceId::generate(),
                &Scope::All {
                    provider: Provider::Meta,
                    level: EntityLevel::Campaign,
                },
            )
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    fn execution_record(
        agent_id: &AgentId,
        workspace_id: &WorkspaceId,
        entity_id: &str,
        skipped: bool,
        budget_delta: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> ActionExecutionRecord {
        ActionExecutionRecord {
            id: aspen_types::EventId::generate(),
            event_id: aspen_types::EventId::generate(),
            agent_id: agent_id.clone(),
            workspace_id: workspace_id.clone(),
            entity_id: EntityId::new(entity_id),
            action: "scale_budget".into(),
            config: serde_json::json!({}),
            success: true,
            skipped,
            description: String::new(),
            error: None,
            duration_ms: 10,
            state_before: None,
            state_after: None,
            rollback: None,
            rollback_possible: false,
            budget_delta,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_event_store_action_accounting() {
        let store = InMemoryEventStore::new();
        let agent_id = AgentId::generate();
        let workspace_id = WorkspaceId::generate();
        let now = Utc::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        store
            .append_action_execution(&execution_record(
                &agent_id, &workspace_id, "c1", false, Some(10.0), now,
            ))
            .await
            .unwrap();
        store
            .append_action_execution(&execution_record(
                &agent_id, &workspace_id, "c1", true, None, now,
            ))
            .await
            .unwrap();
        store
            .append_action_execution(&execution_record(
                &agent_id,
                &workspace_id,
                "c2",
                false,
                Some(-5.0),
                now,
            ))
            .await
            .unwrap();
        // Yesterday's execution does not count toward today.
        store
            .append_action_execution(&execution_record(
                &agent_id,
                &workspace_id,
                "c1",
                false,
                Some(100.0),
                now - Duration::days(1),
            ))
            .await
            .unwrap();

        assert_eq!(
            store
                .executed_action_count_for_entity(&EntityId::new("c1"), midnight)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .executed_action_count_for_agent(&agent_id, midnight)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .executed_action_count_for_workspace(&workspace_id, midnight)
                .await
                .unwrap(),
            2
        );

        // Only positive deltas count toward the budget cap.
        let increase = store
            .budget_increase_for_agent(&agent_id, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(increase, 110.0);
    }

    #[tokio::test]
    async fn test_metric_source_sums_latest_snapshots() {
        let source = InMemoryMetricSource::new();
        let now = Utc::now();
        let date = now.date_naive();

        for (id, spend, revenue) in [("c1", 10.0, 5.0), ("c2", 20.0, 60.0), ("c3", 30.0, 15.0)] {
            let mut metrics = BTreeMap::new();
            metrics.insert("spend".to_string(), spend);
            metrics.insert("revenue".to_string(), revenue);
            source.add_snapshot(MetricSnapshot {
                entity_id: EntityId::new(id),
                date,
                captured_at: now,
                metrics,
            });
        }
        // Stale resync of c1 must not double count.
        let mut stale = BTreeMap::new();
        stale.insert("spend".to_string(), 999.0);
        source.add_snapshot(MetricSnapshot {
            entity_id: EntityId::new("c1"),
            date,
            captured_at: now - Duration::hours(5),
            metrics: stale,
        });

        let ids = vec![EntityId::new("c1"), EntityId::new("c2"), EntityId::new("c3")];
        let observed = source
            .observations(&ids, DateRange::trailing_days(7, now))
            .await
            .unwrap();

        assert_eq!(observed.get("spend"), Some(60.0));
        assert_eq!(observed.get("revenue"), Some(80.0));
        assert!((observed.get("roas").unwrap() - 1.333).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_metric_source_historical_per_date() {
        let source = InMemoryMetricSource::new();
        let now = Utc::now();

        for days_back in [0i64, 1, 7] {
            let mut metrics = BTreeMap::new();
            metrics.insert("spend".to_string(), 10.0 * (days_back + 1) as f64);
            source.add_snapshot(MetricSnapshot {
                entity_id: EntityId::new("c1"),
                date: now.date_naive() - Duration::days(days_back),
                captured_at: now,
                metrics,
            });
        }

        let historical = source
            .historical(&[EntityId::new("c1")], DateRange::trailing_days(30, now))
            .await
            .unwrap();
        assert_eq!(
            historical.value_on(now.date_naive() - Duration::days(1), "spend"),
            Some(20.0)
        );
        assert_eq!(
            historical.value_on(now.date_naive() - Duration::days(7), "spend"),
            Some(80.0)
        );
    }

    #[tokio::test]
    async fn test_entity_state_rows() {
        let repo = InMemoryEntityStateRepository::new();
        let agent_id = AgentId::generate();
        let state = EntityState::new(agent_id.clone(), EntityId::new("c1"), Utc::now());

        repo.upsert(&state).await.unwrap();
        assert!(repo
            .get(&agent_id, &EntityId::new("c1"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(repo.list_for_agent(&agent_id).await.unwrap().len(), 1);
        assert_eq!(repo.delete_for_agent(&agent_id).await.unwrap(), 1);
        assert!(repo
            .get(&agent_id, &EntityId::new("c1"))
            .await
            .unwrap()
            .is_none());
    }
}
