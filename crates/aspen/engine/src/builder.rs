//! Builder for the orchestrator.
//!
//! All collaborators are injected; nothing is module-global. The guards
//! are constructed here from the shared stores and the guard config.

use std::sync::Arc;

use aspen_actions::{ActionDispatcher, NotificationChannel};
use aspen_condition::ConditionEvaluator;
use aspen_guard::{CircuitBreaker, GuardConfig, RateLimiter};
use aspen_store::{
    AgentRepository, EntityCatalog, EntityStateRepository, EventStore, MetricSource,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::locks::PairLocks;
use crate::orchestrator::Orchestrator;

/// Assembles an [`Orchestrator`] from its dependencies.
pub struct EngineBuilder {
    agents: Option<Arc<dyn AgentRepository>>,
    entity_states: Option<Arc<dyn EntityStateRepository>>,
    catalog: Option<Arc<dyn EntityCatalog>>,
    events: Option<Arc<dyn EventStore>>,
    metrics: Option<Arc<dyn MetricSource>>,
    dispatcher: Option<Arc<ActionDispatcher>>,
    notifier: Option<Arc<dyn NotificationChannel>>,
    engine_config: EngineConfig,
    guard_config: GuardConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            agents: None,
            entity_states: None,
            catalog: None,
            events: None,
            metrics: None,
            dispatcher: None,
            notifier: None,
            engine_config: EngineConfig::default(),
            guard_config: GuardConfig::default(),
        }
    }

    /// Set the agent repository
    pub fn with_agents(mut self, agents: Arc<dyn AgentRepository>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Set the per-pair state repository
    pub fn with_entity_states(mut self, states: Arc<dyn EntityStateRepository>) -> Self {
        self.entity_states = Some(states);
        self
    }

    /// Set the entity catalog
    pub fn with_catalog(mut self, catalog: Arc<dyn EntityCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the event store
    pub fn with_events(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the metric source
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the action dispatcher
    pub fn with_dispatcher(mut self, dispatcher: Arc<ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Set the notification channel used for guard trip notices
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the engine configuration
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Set the guard configuration
    pub fn with_guard_config(mut self, config: GuardConfig) -> Self {
        self.guard_config = config;
        self
    }

    /// Build the orchestrator with all components.
    pub fn build(self) -> EngineResult<Orchestrator> {
        let agents = self
            .agents
            .ok_or_else(|| EngineError::Misconfigured("agents repository required".into()))?;
        let entity_states = self
            .entity_states
            .ok_or_else(|| EngineError::Misconfigured("entity state repository required".into()))?;
        let catalog = self
            .catalog
            .ok_or_else(|| EngineError::Misconfigured("entity catalog required".into()))?;
        let events = self
            .events
            .ok_or_else(|| EngineError::Misconfigured("event store required".into()))?;
        let metrics = self
            .metrics
            .ok_or_else(|| EngineError::Misconfigured("metric source required".into()))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| EngineError::Misconfigured("action dispatcher required".into()))?;
        let notifier = self
            .notifier
            .ok_or_else(|| EngineError::Misconfigured("notification channel required".into()))?;

        let rate_limiter = RateLimiter::new(events.clone(), self.guard_config.rate_limits);
        let circuit_breaker = CircuitBreaker::new(
            entity_states.clone(),
            events.clone(),
            self.guard_config.circuit_breaker,
        );

        Ok(Orchestrator {
            agents,
            entity_states,
            catalog,
            events,
            metrics,
            evaluator: ConditionEvaluator::new(),
            dispatcher,
            rate_limiter,
            circuit_breaker,
            notifier,
            locks: PairLocks::new(),
            config: self.engine_config,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
