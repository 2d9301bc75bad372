//! Agent circuit breaker.
//!
//! Runs after action dispatch. A tripped breaker pauses the agent; resuming
//! is a manual operation, the breaker never retries on its own.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use aspen_store::{EntityStateRepository, EventStore};
use aspen_types::{Agent, EvaluationEvent};

use crate::config::CircuitBreakerConfig;
use crate::error::GuardResult;

/// Why the breaker tripped.
#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    /// An entity under the agent keeps failing to evaluate.
    ConsecutiveErrors { entity_id: String, count: u32 },

    /// Summed budget increases within the trailing window exceeded the cap.
    BudgetCapExceeded { total: f64, cap: f64 },

    /// ROAS regressed past the configured drop after a trigger.
    PerformanceRegression { drop_percent: f64 },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::ConsecutiveErrors { entity_id, count } => {
                write!(f, "entity {} failed {} consecutive evaluations", entity_id, count)
            }
            TripReason::BudgetCapExceeded { total, cap } => {
                write!(f, "budget increases {:.2} exceeded cap {:.2}", total, cap)
            }
            TripReason::PerformanceRegression { drop_percent } => {
                write!(f, "roas dropped {:.1}% since trigger", drop_percent)
            }
        }
    }
}

/// Post-action safety checks over an agent's recent behavior.
pub struct CircuitBreaker {
    entity_states: Arc<dyn EntityStateRepository>,
    event_store: Arc<dyn EventStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        entity_states: Arc<dyn EntityStateRepository>,
        event_store: Arc<dyn EventStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            entity_states,
            event_store,
            config,
        }
    }

    /// Run all checks. Returns the first trip found, or `None` when the
    /// agent is healthy.
    pub async fn check_agent(
        &self,
        agent: &Agent,
        now: DateTime<Utc>,
    ) -> GuardResult<Option<TripReason>> {
        if let Some(reason) = self.check_consecutive_errors(agent).await? {
            warn!(agent_id = %agent.id, reason = %reason, "circuit breaker tripped");
            return Ok(Some(reason));
        }
        if let Some(reason) = self.check_budget_cap(agent, now).await? {
            warn!(agent_id = %agent.id, reason = %reason, "circuit breaker tripped");
            return Ok(Some(reason));
        }
        if let Some(reason) = self.check_roas_regression(agent).await? {
            warn!(agent_id = %agent.id, reason = %reason, "circuit breaker tripped");
            return Ok(Some(reason));
        }
        Ok(None)
    }

    async fn check_consecutive_errors(&self, agent: &Agent) -> GuardResult<Option<TripReason>> {
        let states = self.entity_states.list_for_agent(&agent.id).await?;
        Ok(states
            .iter()
            .find(|s| s.consecutive_error_count >= self.config.consecutive_error_threshold)
            .map(|s| TripReason::ConsecutiveErrors {
                entity_id: s.entity_id.as_str().to_string(),
                count: s.consecutive_error_count,
            }))
    }

    async fn check_budget_cap(
        &self,
        agent: &Agent,
        now: DateTime<Utc>,
    ) -> GuardResult<Option<TripReason>> {
        let cap = match self.config.budget_increase_cap {
            Some(cap) => cap,
            None => return Ok(None),
        };
        let since = now - Duration::days(self.config.budget_window_days);
        let total = self
            .event_store
            .budget_increase_for_agent(&agent.id, since)
            .await?;
        if total > cap {
            Ok(Some(TripReason::BudgetCapExceeded { total, cap }))
        } else {
            Ok(None)
        }
    }

    /// Compare current ROAS against the at-trigger baseline: the breaker
    /// trips when the newest evaluation shows a drop past the configured
    /// percentage since the most recent triggered evaluation.
    async fn check_roas_regression(&self, agent: &Agent) -> GuardResult<Option<TripReason>> {
        let config = match &self.config.roas_regression {
            Some(config) => config,
            None => return Ok(None),
        };

        let events = self
            .event_store
            .recent_evaluations(&agent.id, config.check_depth)
            .await?;

        let current = events.first().and_then(roas_of);
        let baseline = events.iter().find(|e| e.triggered).and_then(roas_of);

        if let (Some(current), Some(baseline)) = (current, baseline) {
            if baseline > 0.0 {
                let drop_percent = (baseline - current) / baseline * 100.0;
                if drop_percent >= config.drop_percent {
                    return Ok(Some(TripReason::PerformanceRegression { drop_percent }));
                }
            }
        }
        Ok(None)
    }
}

fn roas_of(event: &EvaluationEvent) -> Option<f64> {
    event.observations.get("roas")
}
