//! The platform client trait and provider routing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use aspen_types::{BudgetKind, Connection, EntityId, EntityLevel, EntityStatus, Provider};

use crate::error::{PlatformError, PlatformResult};
use crate::health::HealthStatus;

/// Entity state fetched live from the platform at action time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEntityState {
    pub status: EntityStatus,

    /// Current budget in currency units, if the entity carries one.
    pub budget: Option<f64>,

    pub budget_kind: Option<BudgetKind>,
}

/// One implementation per ad platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// The provider this client talks to.
    fn provider(&self) -> Provider;

    /// Lightweight probe verifying the connection's credential works
    /// against the platform API.
    async fn health_check(&self, connection: &Connection) -> PlatformResult<HealthStatus>;

    /// Fetch current status and budget directly from the platform.
    async fn live_state(
        &self,
        entity_id: &EntityId,
        level: EntityLevel,
    ) -> PlatformResult<LiveEntityState>;

    /// Set the entity's delivery status.
    async fn update_status(
        &self,
        entity_id: &EntityId,
        level: EntityLevel,
        status: EntityStatus,
    ) -> PlatformResult<()>;

    /// Set the entity's budget. `amount` is in currency units; the client
    /// converts to the platform's native representation.
    async fn update_budget(
        &self,
        entity_id: &EntityId,
        level: EntityLevel,
        amount: f64,
        kind: BudgetKind,
    ) -> PlatformResult<()>;
}

/// Routes calls to the client registered for a provider.
#[derive(Default, Clone)]
pub struct ClientRegistry {
    clients: HashMap<Provider, Arc<dyn PlatformClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn PlatformClient>> {
        self.clients.get(&provider).cloned()
    }

    /// Client for the provider, or a permanent error when none is
    /// registered.
    pub fn require(&self, provider: Provider) -> PlatformResult<Arc<dyn PlatformClient>> {
        self.get(provider)
            .ok_or_else(|| PlatformError::Api(format!("no client registered for {}", provider)))
    }
}
