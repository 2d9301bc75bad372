//! In-memory platform for development and testing.
//!
//! Behaves like a real client: live state reads, status/budget mutations,
//! capability enforcement per provider, and configurable failure injection.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use aspen_types::{BudgetKind, Connection, EntityId, EntityLevel, EntityStatus, Provider};

use crate::client::{LiveEntityState, PlatformClient};
use crate::error::{PlatformError, PlatformResult};
use crate::health::HealthStatus;

/// In-memory platform client.
pub struct InMemoryPlatform {
    provider: Provider,
    entities: DashMap<EntityId, LiveEntityState>,
    probe_healthy: AtomicBool,
    fail_with: RwLock<Option<PlatformError>>,
    mutations: RwLock<Vec<String>>,
}

impl InMemoryPlatform {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            entities: DashMap::new(),
            probe_healthy: AtomicBool::new(true),
            fail_with: RwLock::new(None),
            mutations: RwLock::new(Vec::new()),
        }
    }

    /// Seed an entity's live state.
    pub fn put_entity(&self, id: EntityId, state: LiveEntityState) {
        self.entities.insert(id, state);
    }

    /// Control the health probe outcome.
    pub fn set_probe_healthy(&self, healthy: bool) {
        self.probe_healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make subsequent state/mutation calls fail with the given error.
    pub fn set_fail_with(&self, error: Option<PlatformError>) {
        *self.fail_with.write().unwrap() = error;
    }

    /// Mutation call log, oldest first.
    pub fn mutation_log(&self) -> Vec<String> {
        self.mutations.read().unwrap().clone()
    }

    fn check_failure(&self) -> PlatformResult<()> {
        match self.fail_with.read().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_level(&self, level: EntityLevel) -> PlatformResult<()> {
        if self.provider.supports_level(level) {
            Ok(())
        } else {
            Err(PlatformError::UnsupportedLevel {
                provider: self.provider.to_string(),
                level: level.to_string(),
            })
        }
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn health_check(&self, _connection: &Connection) -> PlatformResult<HealthStatus> {
        if self.probe_healthy.load(Ordering::SeqCst) {
            Ok(HealthStatus::healthy())
        } else {
            Ok(HealthStatus::unhealthy("platform probe returned an error"))
        }
    }

    async fn live_state(
        &self,
        entity_id: &EntityId,
        _level: EntityLevel,
    ) -> PlatformResult<LiveEntityState> {
        self.check_failure()?;
        self.entities
            .get(entity_id)
            .map(|s| s.clone())
            .ok_or_else(|| PlatformError::EntityNotFound(entity_id.as_str().to_string()))
    }

    async fn update_status(
        &self,
        entity_id: &EntityId,
        level: EntityLevel,
        status: EntityStatus,
    ) -> PlatformResult<()> {
        self.check_failure()?;
        self.check_level(level)?;
        let mut entry = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| PlatformError::EntityNotFound(entity_id.as_str().to_string()))?;
        entry.status = status;
        self.mutations
            .write()
            .unwrap()
            .push(format!("status {} -> {}", entity_id.as_str(), status));
        Ok(())
    }

    async fn update_budget(
        &self,
        entity_id: &EntityId,
        level: EntityLevel,
        amount: f64,
        kind: BudgetKind,
    ) -> PlatformResult<()> {
        self.check_failure()?;
        self.check_level(level)?;
        let mut entry = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| PlatformError::EntityNotFound(entity_id.as_str().to_string()))?;
        entry.budget = Some(self.provider.round_budget(amount));
        entry.budget_kind = Some(kind);
        self.mutations.write().unwrap().push(format!(
            "budget {} -> {:.6} ({})",
            entity_id.as_str(),
            amount,
            kind
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_entity(budget: f64) -> LiveEntityState {
        LiveEntityState {
            status: EntityStatus::Active,
            budget: Some(budget),
            budget_kind: Some(BudgetKind::Daily),
        }
    }

    #[tokio::test]
    async fn test_live_state_roundtrip() {
        let platform = InMemoryPlatform::new(Provider::Meta);
        platform.put_entity(EntityId::new("c1"), active_entity(100.0));

        let state = platform
            .live_state(&EntityId::new("c1"), EntityLevel::Campaign)
            .await
            .unwrap();
        assert_eq!(state.status, EntityStatus::Active);
        assert_eq!(state.budget, Some(100.0));
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let platform = InMemoryPlatform::new(Provider::Meta);
        let err = platform
            .live_state(&EntityId::new("nope"), EntityLevel::Campaign)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn test_google_rejects_ad_set_mutation() {
        let platform = InMemoryPlatform::new(Provider::Google);
        platform.put_entity(EntityId::new("g1"), active_entity(50.0));

        let err = platform
            .update_status(&EntityId::new("g1"), EntityLevel::AdSet, EntityStatus::Paused)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::UnsupportedLevel { .. }));
    }

    #[tokio::test]
    async fn test_budget_rounded_to_native_unit() {
        let platform = InMemoryPlatform::new(Provider::Meta);
        platform.put_entity(EntityId::new("c1"), active_entity(100.0));

        platform
            .update_budget(
                &EntityId::new("c1"),
                EntityLevel::Campaign,
                123.456_78,
                BudgetKind::Daily,
            )
            .await
            .unwrap();

        let state = platform
            .live_state(&EntityId::new("c1"), EntityLevel::Campaign)
            .await
            .unwrap();
        assert_eq!(state.budget, Some(123.46));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let platform = InMemoryPlatform::new(Provider::Meta);
        platform.put_entity(EntityId::new("c1"), active_entity(100.0));
        platform.set_fail_with(Some(PlatformError::RateLimited("backoff".into())));

        let err = platform
            .live_state(&EntityId::new("c1"), EntityLevel::Campaign)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        platform.set_fail_with(None);
        assert!(platform
            .live_state(&EntityId::new("c1"), EntityLevel::Campaign)
            .await
            .is_ok());
    }
}
