//! Daily action caps.
//!
//! Before any action dispatch the engine asks the limiter whether the
//! entity, the agent, and the workspace are each still under their daily
//! cap. A blocked dispatch is reported with a reason and does not count as
//! a failure.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use aspen_store::EventStore;
use aspen_types::{AgentId, EntityId, WorkspaceId};

use crate::config::RateLimitConfig;
use crate::error::GuardResult;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,

    /// Which cap blocked the action, when one did.
    pub reason: Option<String>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Counts today's executed actions against configurable daily caps.
pub struct RateLimiter {
    event_store: Arc<dyn EventStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(event_store: Arc<dyn EventStore>, config: RateLimitConfig) -> Self {
        Self {
            event_store,
            config,
        }
    }

    /// Check all three caps. The first exceeded cap wins.
    pub async fn check(
        &self,
        workspace_id: &WorkspaceId,
        agent_id: &AgentId,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> GuardResult<RateDecision> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();

        let entity_count = self
            .event_store
            .executed_action_count_for_entity(entity_id, midnight)
            .await?;
        if entity_count >= self.config.max_actions_per_entity_per_day {
            debug!(entity_id = %entity_id, count = entity_count, "entity rate limit hit");
            return Ok(RateDecision::blocked(format!(
                "entity daily action limit reached ({}/{})",
                entity_count, self.config.max_actions_per_entity_per_day
            )));
        }

        let agent_count = self
            .event_store
            .executed_action_count_for_agent(agent_id, midnight)
            .await?;
        if agent_count >= self.config.max_actions_per_agent_per_day {
            debug!(agent_id = %agent_id, count = agent_count, "agent rate limit hit");
            return Ok(RateDecision::blocked(format!(
                "agent daily action limit reached ({}/{})",
                agent_count, self.config.max_actions_per_agent_per_day
            )));
        }

        let workspace_count = self
            .event_store
            .executed_action_count_for_workspace(workspace_id, midnight)
            .await?;
        if workspace_count >= self.config.max_actions_per_workspace_per_day {
            debug!(
                workspace_id = %workspace_id,
                count = workspace_count,
                "workspace rate limit hit"
            );
            return Ok(RateDecision::blocked(format!(
                "workspace daily action limit reached ({}/{})",
                workspace_count, self.config.max_actions_per_workspace_per_day
            )));
        }

        Ok(RateDecision::allowed())
    }
}
