//! Shared application state for API handlers.

use std::sync::Arc;

use aspen_engine::Orchestrator;
use aspen_store::{AgentRepository, EventStore};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub agents: Arc<dyn AgentRepository>,
    pub events: Arc<dyn EventStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
