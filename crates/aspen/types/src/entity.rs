//! Supervised entities and per-pair state
//!
//! `Entity` is the synced catalog record of a platform entity. `EntityState`
//! is the engine's per-(agent, entity) accumulation row; its accumulation
//! fields are only ever advanced through the state machine's transition
//! function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{AgentId, ConnectionId, EntityId, WorkspaceId};
use crate::provider::{EntityLevel, EntityStatus, Provider};

/// Upper bound on stored condition-met timestamps per pair.
pub const MET_HISTORY_CAP: usize = 500;

/// A platform entity known to the workspace catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub workspace_id: WorkspaceId,
    pub provider: Provider,
    pub level: EntityLevel,
    pub name: String,

    /// Last synced delivery status. Actions never trust this; they fetch
    /// live state from the platform.
    pub status: EntityStatus,

    /// The authorized account link used for mutations, if any.
    pub connection_id: Option<ConnectionId>,
}

/// An authorized link to an ad platform account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub workspace_id: WorkspaceId,
    pub provider: Provider,

    /// Whether the link is currently enabled.
    pub active: bool,

    /// Opaque reference to the stored credential, if one exists. Token
    /// acquisition and refresh happen outside the engine.
    pub credential_ref: Option<String>,
}

impl Connection {
    /// A connection is usable when it is active and has a credential.
    pub fn is_usable(&self) -> bool {
        self.active && self.credential_ref.is_some()
    }
}

/// States of the per-pair accumulation machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// No recent condition hits.
    Watching,

    /// Condition hits are accumulating toward the required count.
    Accumulating,

    /// Accumulation completed; continuous-mode pairs stay here between
    /// interval firings.
    Triggered,

    /// A cooldown is in effect until `next_eligible_at`.
    Cooldown,

    /// Too many evaluation failures; stays here until manual reset.
    Error,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Watching => write!(f, "watching"),
            MachineState::Accumulating => write!(f, "accumulating"),
            MachineState::Triggered => write!(f, "triggered"),
            MachineState::Cooldown => write!(f, "cooldown"),
            MachineState::Error => write!(f, "error"),
        }
    }
}

/// Accumulation bookkeeping carried between evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulationSnapshot {
    /// Counted hits (per the agent's counting unit).
    pub count: u32,

    /// When the current run of hits started.
    pub started_at: Option<DateTime<Utc>>,

    /// Timestamps of counted hits, newest last. Bounded by
    /// `MET_HISTORY_CAP`; used by window-based accumulation.
    pub met_history: Vec<DateTime<Utc>>,
}

impl AccumulationSnapshot {
    /// Empty snapshot.
    pub fn reset() -> Self {
        Self::default()
    }

    /// Drop history entries at or before the cutoff and enforce the cap.
    pub fn pruned(mut self, cutoff: DateTime<Utc>) -> Self {
        self.met_history.retain(|t| *t > cutoff);
        if self.met_history.len() > MET_HISTORY_CAP {
            let excess = self.met_history.len() - MET_HISTORY_CAP;
            self.met_history.drain(..excess);
        }
        self
    }
}

/// Per-(agent, entity) machine state. Aggregate-mode agents store one
/// synthetic row under the agent's aggregate sentinel entity ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub agent_id: AgentId,
    pub entity_id: EntityId,

    pub machine_state: MachineState,
    pub accumulation: AccumulationSnapshot,

    pub last_triggered_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,

    pub consecutive_error_count: u32,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityState {
    /// Fresh state for a pair seen for the first time.
    pub fn new(agent_id: AgentId, entity_id: EntityId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            entity_id,
            machine_state: MachineState::Watching,
            accumulation: AccumulationSnapshot::reset(),
            last_triggered_at: None,
            next_eligible_at: None,
            trigger_count: 0,
            consecutive_error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an evaluation failure for this pair.
    pub fn record_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.consecutive_error_count += 1;
        let mut msg = message.into();
        msg.truncate(500);
        self.last_error = Some(msg);
        self.updated_at = now;
    }

    /// Clear error bookkeeping after a successful evaluation.
    pub fn clear_errors(&mut self, now: DateTime<Utc>) {
        self.consecutive_error_count = 0;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Manual reset out of the ERROR state back to watching.
    pub fn reset_machine(&mut self, now: DateTime<Utc>) {
        self.machine_state = MachineState::Watching;
        self.accumulation = AccumulationSnapshot::reset();
        self.consecutive_error_count = 0;
        self.last_error = None;
        self.next_eligible_at = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_state_is_watching() {
        let state = EntityState::new(AgentId::generate(), EntityId::new("c1"), Utc::now());
        assert_eq!(state.machine_state, MachineState::Watching);
        assert_eq!(state.accumulation.count, 0);
        assert!(state.accumulation.met_history.is_empty());
    }

    #[test]
    fn test_prune_drops_old_entries() {
        let now = Utc::now();
        let snapshot = AccumulationSnapshot {
            count: 3,
            started_at: Some(now - Duration::hours(3)),
            met_history: vec![
                now - Duration::hours(3),
                now - Duration::hours(2),
                now - Duration::minutes(10),
            ],
        };
        let pruned = snapshot.pruned(now - Duration::hours(1));
        assert_eq!(pruned.met_history.len(), 1);
    }

    #[test]
    fn test_prune_enforces_cap() {
        let now = Utc::now();
        let snapshot = AccumulationSnapshot {
            count: 0,
            started_at: None,
            met_history: (0..MET_HISTORY_CAP + 50)
                .map(|i| now - Duration::seconds(i as i64))
                .collect(),
        };
        let pruned = snapshot.pruned(now - Duration::days(365));
        assert_eq!(pruned.met_history.len(), MET_HISTORY_CAP);
    }

    #[test]
    fn test_error_bookkeeping() {
        let mut state = EntityState::new(AgentId::generate(), EntityId::new("c1"), Utc::now());
        state.record_error("boom", Utc::now());
        state.record_error("boom again", Utc::now());
        assert_eq!(state.consecutive_error_count, 2);

        state.clear_errors(Utc::now());
        assert_eq!(state.consecutive_error_count, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_reset_machine() {
        let mut state = EntityState::new(AgentId::generate(), EntityId::new("c1"), Utc::now());
        state.machine_state = MachineState::Error;
        state.record_error("stuck", Utc::now());

        state.reset_machine(Utc::now());
        assert_eq!(state.machine_state, MachineState::Watching);
        assert_eq!(state.consecutive_error_count, 0);
    }
}
