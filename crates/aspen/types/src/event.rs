//! Append-only evaluation events and action execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entity::MachineState;
use crate::ids::{AgentId, EntityId, EventId, WorkspaceId};
use crate::observation::ObservationSet;

/// Terminal outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Evaluation ran to completion (triggered or not).
    Completed,

    /// Evaluation failed; see `error`.
    Error,
}

/// Result of executing one configured action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Stable action kind name ("notify", "scale_budget", ...).
    pub action: String,

    /// Whether the action completed successfully. Skipped actions are
    /// successful no-ops.
    pub success: bool,

    /// The action did not run (precondition, health, rate limit, no-op).
    pub skipped: bool,

    /// Why the action was skipped, when it was.
    pub skip_reason: Option<String>,

    /// Human-readable description of what happened.
    pub description: String,

    pub error: Option<String>,
    pub duration_ms: u64,

    /// Whether enough state was captured to reverse the action.
    pub rollback_possible: bool,
}

impl ActionResult {
    pub fn success(action: &str, description: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            skipped: false,
            skip_reason: None,
            description: description.into(),
            error: None,
            duration_ms,
            rollback_possible: false,
        }
    }

    pub fn skipped(action: &str, reason: impl Into<String>, duration_ms: u64) -> Self {
        let reason = reason.into();
        Self {
            action: action.to_string(),
            success: true,
            skipped: true,
            skip_reason: Some(reason.clone()),
            description: format!("skipped: {}", reason),
            error: None,
            duration_ms,
            rollback_possible: false,
        }
    }

    pub fn failed(action: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            action: action.to_string(),
            success: false,
            skipped: false,
            skip_reason: None,
            description: format!("failed: {}", error),
            error: Some(error),
            duration_ms,
            rollback_possible: false,
        }
    }

    pub fn with_rollback_possible(mut self, possible: bool) -> Self {
        self.rollback_possible = possible;
        self
    }
}

/// Data sufficient to reverse a mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackPayload {
    /// Restore the previous budget amount.
    RestoreBudget {
        amount: f64,
        budget_kind: crate::provider::BudgetKind,
    },

    /// Restore the previous delivery status.
    RestoreStatus {
        status: crate::provider::EntityStatus,
    },
}

/// Immutable record of one evaluation of one (agent, entity) pair or
/// aggregate unit. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub id: EventId,
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub entity_id: EntityId,

    /// Whether this event covers the agent's whole aggregate scope.
    pub aggregate: bool,

    /// Snapshot of the observations the condition saw.
    pub observations: ObservationSet,

    /// Condition result; `None` when the condition was bypassed or the
    /// evaluation errored before the condition ran.
    pub condition_met: Option<bool>,
    pub condition_explanation: String,

    /// Inputs the evaluator consumed, keyed by a path into the tree.
    pub condition_inputs: BTreeMap<String, serde_json::Value>,

    pub state_before: MachineState,
    pub state_after: MachineState,
    pub accumulation_before: u32,
    pub accumulation_after: u32,

    pub triggered: bool,
    pub trigger_reason: String,

    /// Short human summary for activity feeds.
    pub summary: String,

    pub outcome: EvaluationOutcome,
    pub error: Option<String>,

    pub action_results: Vec<ActionResult>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl EvaluationEvent {
    /// Record for an evaluation that failed before producing a decision.
    /// State fields carry the pre-evaluation values unchanged.
    pub fn error_event(
        agent_id: AgentId,
        workspace_id: WorkspaceId,
        entity_id: EntityId,
        aggregate: bool,
        state: MachineState,
        accumulation_count: u32,
        error: impl Into<String>,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let error = error.into();
        Self {
            id: EventId::generate(),
            agent_id,
            workspace_id,
            entity_id,
            aggregate,
            observations: ObservationSet::new(),
            condition_met: None,
            condition_explanation: String::new(),
            condition_inputs: BTreeMap::new(),
            state_before: state,
            state_after: state,
            accumulation_before: accumulation_count,
            accumulation_after: accumulation_count,
            triggered: false,
            trigger_reason: "evaluation error".into(),
            summary: format!("evaluation failed: {}", error),
            outcome: EvaluationOutcome::Error,
            error: Some(error),
            action_results: Vec::new(),
            duration_ms,
            created_at: now,
        }
    }
}

/// Append-only record of one executed (or skipped/failed) action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutionRecord {
    pub id: EventId,

    /// The evaluation event this execution belongs to.
    pub event_id: EventId,

    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub entity_id: EntityId,

    pub action: String,

    /// The action configuration as executed.
    pub config: serde_json::Value,

    pub success: bool,
    pub skipped: bool,
    pub description: String,
    pub error: Option<String>,
    pub duration_ms: u64,

    /// Live platform state captured before/after a mutating action.
    pub state_before: Option<serde_json::Value>,
    pub state_after: Option<serde_json::Value>,

    pub rollback: Option<RollbackPayload>,
    pub rollback_possible: bool,

    /// Signed budget delta in currency units, for budget-cap accounting.
    pub budget_delta: Option<f64>,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_result_constructors() {
        let ok = ActionResult::success("pause", "paused campaign", 120);
        assert!(ok.success && !ok.skipped);

        let skip = ActionResult::skipped("pause", "already paused", 5);
        assert!(skip.success && skip.skipped);
        assert_eq!(skip.skip_reason.as_deref(), Some("already paused"));

        let failed = ActionResult::failed("scale_budget", "permission denied", 300);
        assert!(!failed.success);
        assert!(!failed.rollback_possible);
    }

    #[test]
    fn test_error_event_preserves_state() {
        let event = EvaluationEvent::error_event(
            AgentId::generate(),
            WorkspaceId::generate(),
            EntityId::new("c1"),
            false,
            MachineState::Accumulating,
            2,
            "observation fetch timed out",
            1500,
            Utc::now(),
        );
        assert_eq!(event.outcome, EvaluationOutcome::Error);
        assert_eq!(event.state_before, event.state_after);
        assert_eq!(event.accumulation_before, 2);
        assert!(!event.triggered);
    }

    #[test]
    fn test_rollback_payload_serde() {
        let payload = RollbackPayload::RestoreBudget {
            amount: 150.0,
            budget_kind: crate::provider::BudgetKind::Daily,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "restore_budget");
        let back: RollbackPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
