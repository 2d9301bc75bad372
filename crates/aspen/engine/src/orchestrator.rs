//! The evaluation orchestrator.
//!
//! One `run_cycle` call selects due agents, resolves each agent's scope
//! live, evaluates every entity (or the summed scope in aggregate mode),
//! feeds results through the accumulation machine, dispatches actions
//! behind the safety guards, and persists append-only audit events.
//! Failures are contained: an entity failure never aborts its agent's
//! batch, an agent failure never aborts the cycle.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use aspen_accumulation::{apply_transition, process, TransitionInput, TransitionOutput};
use aspen_actions::{
    ActionContext, ActionDispatcher, ExecutedAction, NotificationChannel, TemplateVars,
};
use aspen_condition::{ConditionEvaluator, ConditionOutcome};
use aspen_guard::{CircuitBreaker, RateLimiter, TripReason};
use aspen_store::{
    AgentRepository, EntityCatalog, EntityStateRepository, EventStore, MetricSource,
};
use aspen_types::{
    ActionExecutionRecord, ActionResult, Agent, AgentId, AgentStatus, Condition, DateRange,
    Entity, EntityId, EntityState, EvaluationEvent, EvaluationOutcome, EventId,
    HistoricalObservations, MachineState, ObservationSet,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::locks::PairLocks;
use crate::schedule::is_due;

/// Summary of one engine cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Active agents considered.
    pub agents_considered: usize,

    /// Agents that were due and evaluated.
    pub agents_evaluated: usize,

    /// Entity (or aggregate) units evaluated.
    pub units_evaluated: usize,

    /// Units that fired a trigger.
    pub triggers_fired: usize,

    /// Units that failed to evaluate.
    pub unit_errors: usize,

    /// Agents that failed as a whole.
    pub agent_errors: usize,
}

struct AgentStats {
    units: usize,
    triggered: usize,
    errors: usize,
}

struct UnitOutcome {
    triggered: bool,
    errored: bool,
}

/// Drives supervision cycles over all active agents.
pub struct Orchestrator {
    pub(crate) agents: Arc<dyn AgentRepository>,
    pub(crate) entity_states: Arc<dyn EntityStateRepository>,
    pub(crate) catalog: Arc<dyn EntityCatalog>,
    pub(crate) events: Arc<dyn EventStore>,
    pub(crate) metrics: Arc<dyn MetricSource>,
    pub(crate) evaluator: ConditionEvaluator,
    pub(crate) dispatcher: Arc<ActionDispatcher>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
    pub(crate) notifier: Arc<dyn NotificationChannel>,
    pub(crate) locks: PairLocks,
    pub(crate) config: EngineConfig,
}

impl Orchestrator {
    /// Run one cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngineResult<CycleReport> {
        let active = self.agents.list_active().await?;
        let mut report = CycleReport {
            agents_considered: active.len(),
            ..CycleReport::default()
        };

        for agent in active {
            if !is_due(&agent, now, &self.config) {
                continue;
            }
            report.agents_evaluated += 1;

            // Whole-agent containment: a failing agent is marked and the
            // cycle moves on.
            let mut agent = agent;
            match self.evaluate_agent(&agent, now).await {
                Ok(stats) => {
                    report.units_evaluated += stats.units;
                    report.triggers_fired += stats.triggered;
                    report.unit_errors += stats.errors;

                    agent.record_success(now);
                    if stats.triggered > 0 {
                        agent.record_trigger(now);
                    }

                    // Action-adjacent breaker check.
                    if stats.triggered > 0 || stats.errors > 0 {
                        match self.circuit_breaker.check_agent(&agent, now).await {
                            Ok(Some(trip)) => self.trip_agent(&mut agent, &trip, now).await,
                            Ok(None) => {}
                            Err(e) => {
                                warn!(agent_id = %agent.id, error = %e, "breaker check failed")
                            }
                        }
                    }

                    if let Err(e) = self.agents.update(&agent).await {
                        warn!(agent_id = %agent.id, error = %e, "agent update failed");
                    }
                }
                Err(e) => {
                    report.agent_errors += 1;
                    warn!(agent_id = %agent.id, error = %e, "agent evaluation failed");
                    agent.record_failure(&e.to_string(), now);
                    if agent.consecutive_error_count >= self.config.agent_error_threshold {
                        agent.status = AgentStatus::Error;
                        warn!(agent_id = %agent.id, "agent flipped to error status");
                    }
                    if let Err(e) = self.agents.update(&agent).await {
                        warn!(agent_id = %agent.id, error = %e, "agent update failed");
                    }
                }
            }
        }

        info!(
            agents = report.agents_evaluated,
            units = report.units_evaluated,
            triggers = report.triggers_fired,
            errors = report.unit_errors,
            "cycle complete"
        );
        Ok(report)
    }

    async fn evaluate_agent(&self, agent: &Agent, now: DateTime<Utc>) -> EngineResult<AgentStats> {
        let entities = self
            .catalog
            .list_by_scope(&agent.workspace_id, &agent.scope)
            .await?;

        if entities.is_empty() {
            debug!(agent_id = %agent.id, "scope resolved to no entities");
            return Ok(AgentStats {
                units: 0,
                triggered: 0,
                errors: 0,
            });
        }

        let outcomes: Vec<UnitOutcome> = if agent.aggregate {
            let ids: Vec<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
            vec![self.evaluate_unit(agent, None, ids, now).await]
        } else {
            stream::iter(entities)
                .map(|entity| {
                    let ids = vec![entity.id.clone()];
                    async move { self.evaluate_unit(agent, Some(entity), ids, now).await }
                })
                .buffer_unordered(self.config.entity_concurrency.max(1))
                .collect()
                .await
        };

        Ok(AgentStats {
            units: outcomes.len(),
            triggered: outcomes.iter().filter(|o| o.triggered).count(),
            errors: outcomes.iter().filter(|o| o.errored).count(),
        })
    }

    /// Evaluate one (agent, entity) pair or the aggregate unit. Never
    /// returns an error; failures are recorded on the pair and as an
    /// error event.
    async fn evaluate_unit(
        &self,
        agent: &Agent,
        entity: Option<Entity>,
        entity_ids: Vec<EntityId>,
        now: DateTime<Utc>,
    ) -> UnitOutcome {
        let unit_entity_id = entity
            .as_ref()
            .map(|e| e.id.clone())
            .unwrap_or_else(|| EntityId::aggregate_for(&agent.id));

        // Serialize this pair against any still-running evaluation.
        let lock = self.locks.lock_for(&agent.id, &unit_entity_id);
        let _guard = lock.lock().await;

        let started = Instant::now();

        let mut state = match self.entity_states.get(&agent.id, &unit_entity_id).await {
            Ok(Some(state)) => state,
            Ok(None) => EntityState::new(agent.id.clone(), unit_entity_id.clone(), now),
            Err(e) => {
                warn!(
                    agent_id = %agent.id,
                    entity_id = %unit_entity_id,
                    error = %e,
                    "state load failed"
                );
                return UnitOutcome {
                    triggered: false,
                    errored: true,
                };
            }
        };

        let fetched = self.fetch_and_evaluate(agent, &entity_ids, now).await;
        let (observations, outcome) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                state.record_error(e.to_string(), now);
                if let Err(err) = self.entity_states.upsert(&state).await {
                    warn!(entity_id = %unit_entity_id, error = %err, "state upsert failed");
                }
                let event = EvaluationEvent::error_event(
                    agent.id.clone(),
                    agent.workspace_id.clone(),
                    unit_entity_id.clone(),
                    agent.aggregate,
                    state.machine_state,
                    state.accumulation.count,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                    now,
                );
                if let Err(err) = self.events.append_evaluation(&event).await {
                    warn!(entity_id = %unit_entity_id, error = %err, "event append failed");
                }
                return UnitOutcome {
                    triggered: false,
                    errored: true,
                };
            }
        };

        let input = TransitionInput {
            current_state: state.machine_state,
            condition_met: outcome.met,
            accumulation: state.accumulation.clone(),
            config: agent.accumulation.clone(),
            trigger: agent.trigger.clone(),
            now,
            last_triggered_at: state.last_triggered_at,
            next_eligible_at: state.next_eligible_at,
        };
        let output = process(&input);

        let summary = build_summary(agent, &output, &outcome);

        let (action_results, executed_actions, trigger_reason) = self
            .run_actions(agent, entity.as_ref(), &unit_entity_id, &observations, &output, &summary, now)
            .await;

        let state_before = state.machine_state;
        let accumulation_before = state.accumulation.count;
        apply_transition(&mut state, &output, now);
        state.clear_errors(now);
        if let Err(e) = self.entity_states.upsert(&state).await {
            warn!(entity_id = %unit_entity_id, error = %e, "state upsert failed");
        }

        let event = EvaluationEvent {
            id: EventId::generate(),
            agent_id: agent.id.clone(),
            workspace_id: agent.workspace_id.clone(),
            entity_id: unit_entity_id.clone(),
            aggregate: agent.aggregate,
            observations,
            condition_met: if agent.skip_condition {
                None
            } else {
                Some(outcome.met)
            },
            condition_explanation: outcome.explanation,
            condition_inputs: outcome.inputs,
            state_before,
            state_after: state.machine_state,
            accumulation_before,
            accumulation_after: state.accumulation.count,
            triggered: output.should_trigger,
            trigger_reason,
            summary,
            outcome: EvaluationOutcome::Completed,
            error: None,
            action_results,
            duration_ms: started.elapsed().as_millis() as u64,
            created_at: now,
        };
        if let Err(e) = self.events.append_evaluation(&event).await {
            warn!(entity_id = %unit_entity_id, error = %e, "event append failed");
        }

        for executed in executed_actions {
            let record = ActionExecutionRecord {
                id: EventId::generate(),
                event_id: event.id.clone(),
                agent_id: agent.id.clone(),
                workspace_id: agent.workspace_id.clone(),
                entity_id: unit_entity_id.clone(),
                action: executed.result.action.clone(),
                config: executed.config,
                success: executed.result.success,
                skipped: executed.result.skipped,
                description: executed.result.description.clone(),
                error: executed.result.error.clone(),
                duration_ms: executed.result.duration_ms,
                state_before: executed.state_before,
                state_after: executed.state_after,
                rollback: executed.rollback,
                rollback_possible: executed.result.rollback_possible,
                budget_delta: executed.budget_delta,
                created_at: now,
            };
            if let Err(e) = self.events.append_action_execution(&record).await {
                warn!(entity_id = %unit_entity_id, error = %e, "action record append failed");
            }
        }

        UnitOutcome {
            triggered: output.should_trigger,
            errored: false,
        }
    }

    /// Fetch observations (and history when the condition needs it) and
    /// evaluate the condition. `skip_condition` agents bypass evaluation
    /// and report an unconditional hit.
    async fn fetch_and_evaluate(
        &self,
        agent: &Agent,
        entity_ids: &[EntityId],
        now: DateTime<Utc>,
    ) -> EngineResult<(ObservationSet, ConditionOutcome)> {
        let window = DateRange::trailing_days(self.config.observation_window_days, now);
        let observations = self
            .with_observation_timeout(self.metrics.observations(entity_ids, window))
            .await??;

        if agent.skip_condition {
            return Ok((
                observations,
                ConditionOutcome {
                    met: true,
                    explanation: "condition bypassed (always run)".into(),
                    inputs: BTreeMap::new(),
                },
            ));
        }

        let historical = if uses_change(&agent.condition) {
            let window = DateRange::trailing_days(self.config.historical_window_days, now);
            self.with_observation_timeout(self.metrics.historical(entity_ids, window))
                .await??
        } else {
            HistoricalObservations::new()
        };

        let outcome =
            self.evaluator
                .evaluate(&agent.condition, &observations, &historical, now.date_naive());
        Ok((observations, outcome))
    }

    /// Dispatch actions when the transition fired, gated by the rate
    /// limiter. Returns the results, the full execution outputs, and the
    /// final trigger reason.
    #[allow(clippy::too_many_arguments)]
    async fn run_actions(
        &self,
        agent: &Agent,
        entity: Option<&Entity>,
        unit_entity_id: &EntityId,
        observations: &ObservationSet,
        output: &TransitionOutput,
        summary: &str,
        now: DateTime<Utc>,
    ) -> (Vec<ActionResult>, Vec<ExecutedAction>, String) {
        if !output.should_trigger || agent.actions.is_empty() {
            return (Vec::new(), Vec::new(), output.reason.clone());
        }

        let decision = match self
            .rate_limiter
            .check(&agent.workspace_id, &agent.id, unit_entity_id, now)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                // A failing guard store blocks dispatch; actions must not
                // run unchecked.
                warn!(agent_id = %agent.id, error = %e, "rate limit check failed");
                aspen_guard::RateDecision {
                    allowed: false,
                    reason: Some(format!("rate limit check failed: {}", e)),
                }
            }
        };

        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "rate limited".to_string());
            info!(agent_id = %agent.id, entity_id = %unit_entity_id, reason = %reason, "actions blocked");
            let results: Vec<ActionResult> = agent
                .actions
                .iter()
                .map(|action| ActionResult::skipped(action.kind_name(), reason.clone(), 0))
                .collect();
            let executed: Vec<ExecutedAction> = agent
                .actions
                .iter()
                .zip(results.iter())
                .map(|(action, result)| ExecutedAction {
                    result: result.clone(),
                    config: serde_json::to_value(action).unwrap_or_else(|_| serde_json::json!({})),
                    state_before: None,
                    state_after: None,
                    rollback: None,
                    budget_delta: None,
                })
                .collect();
            let trigger_reason = format!("{}; actions blocked: {}", output.reason, reason);
            return (results, executed, trigger_reason);
        }

        let ctx = ActionContext {
            agent,
            entity,
            observations,
            summary,
            now,
        };

        let mut results = Vec::with_capacity(agent.actions.len());
        let mut executed_actions = Vec::with_capacity(agent.actions.len());
        for action in &agent.actions {
            let executed = self.dispatcher.execute(action, &ctx).await;
            results.push(executed.result.clone());
            executed_actions.push(executed);
        }
        (results, executed_actions, output.reason.clone())
    }

    async fn trip_agent(&self, agent: &mut Agent, trip: &TripReason, now: DateTime<Utc>) {
        agent.status = AgentStatus::Paused;
        agent.error_message = Some(format!("circuit breaker: {}", trip));
        agent.updated_at = now;
        warn!(agent_id = %agent.id, reason = %trip, "agent paused by circuit breaker");

        if let Some(notify) = &self.config.trip_notification {
            let mut vars = TemplateVars::new();
            vars.insert("agent_name".into(), agent.name.clone());
            vars.insert("agent_id".into(), agent.id.to_string());
            vars.insert("reason".into(), trip.to_string());
            if let Err(e) = self
                .notifier
                .send(
                    notify.kind,
                    &notify.recipients,
                    &vars,
                    Some("Agent {{agent_name}} was paused: {{reason}}"),
                )
                .await
            {
                warn!(agent_id = %agent.id, error = %e, "trip notification failed");
            }
        }
    }

    /// Manually resume a paused or errored agent. Clears agent error
    /// bookkeeping and resets any pairs stuck in the error state.
    pub async fn resume_agent(&self, id: &AgentId, now: DateTime<Utc>) -> EngineResult<Agent> {
        let mut agent = self
            .agents
            .get(id)
            .await?
            .ok_or_else(|| EngineError::AgentNotFound(id.clone()))?;

        agent.status = AgentStatus::Active;
        agent.error_message = None;
        agent.consecutive_error_count = 0;
        agent.updated_at = now;

        for mut state in self.entity_states.list_for_agent(id).await? {
            if state.machine_state == MachineState::Error {
                state.reset_machine(now);
                self.entity_states.upsert(&state).await?;
            }
        }

        self.agents.update(&agent).await?;
        info!(agent_id = %agent.id, "agent resumed");
        Ok(agent)
    }

    /// Remove an agent together with its pair state and locks.
    pub async fn delete_agent(&self, id: &AgentId) -> EngineResult<()> {
        self.agents.delete(id).await?;
        self.entity_states.delete_for_agent(id).await?;
        self.locks.forget_agent(id);
        Ok(())
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn with_observation_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> EngineResult<T> {
        let secs = self.config.observation_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| EngineError::ObservationTimeout(secs))
    }
}

/// Whether the tree contains a change condition (which needs history).
fn uses_change(condition: &Condition) -> bool {
    match condition {
        Condition::Threshold { .. } => false,
        Condition::Change { .. } => true,
        Condition::Composite { conditions, .. } => conditions.iter().any(uses_change),
        Condition::Not { condition } => uses_change(condition),
    }
}

fn build_summary(agent: &Agent, output: &TransitionOutput, outcome: &ConditionOutcome) -> String {
    if output.should_trigger {
        format!("{} triggered: {}", agent.name, outcome.explanation)
    } else {
        format!(
            "{} {}: {}",
            agent.name, output.new_state, outcome.explanation
        )
    }
}
