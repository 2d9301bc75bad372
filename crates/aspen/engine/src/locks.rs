//! Per-(agent, entity) serialization.
//!
//! Each pair's read-transition-write sequence must not overlap with a
//! still-running evaluation of the same pair from a previous cycle, so the
//! engine holds the pair's lock across the whole unit evaluation,
//! including action dispatch. Entities of one agent still evaluate
//! concurrently because they hold different locks.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use aspen_types::{AgentId, EntityId};

/// Lock map keyed by (agent, entity).
#[derive(Default)]
pub struct PairLocks {
    locks: DashMap<(AgentId, EntityId), Arc<Mutex<()>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a pair, created on first use.
    pub fn lock_for(&self, agent_id: &AgentId, entity_id: &EntityId) -> Arc<Mutex<()>> {
        self.locks
            .entry((agent_id.clone(), entity_id.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop locks belonging to a deleted agent.
    pub fn forget_agent(&self, agent_id: &AgentId) {
        self.locks.retain(|(agent, _), _| agent != agent_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_pair_serializes() {
        let locks = Arc::new(PairLocks::new());
        let agent_id = AgentId::generate();
        let entity_id = EntityId::new("c1");

        let lock = locks.lock_for(&agent_id, &entity_id);
        let guard = lock.lock().await;

        // A second acquisition of the same pair must wait.
        let second = locks.lock_for(&agent_id, &entity_id);
        let waited = tokio::time::timeout(Duration::from_millis(50), second.lock()).await;
        assert!(waited.is_err(), "same pair acquired concurrently");

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(50), second.lock()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_entities_do_not_block() {
        let locks = PairLocks::new();
        let agent_id = AgentId::generate();

        let a = locks.lock_for(&agent_id, &EntityId::new("c1"));
        let _guard = a.lock().await;

        let b = locks.lock_for(&agent_id, &EntityId::new("c2"));
        let acquired = tokio::time::timeout(Duration::from_millis(50), b.lock()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_forget_agent() {
        let locks = PairLocks::new();
        let agent_id = AgentId::generate();
        locks.lock_for(&agent_id, &EntityId::new("c1"));
        locks.lock_for(&agent_id, &EntityId::new("c2"));
        locks.lock_for(&AgentId::generate(), &EntityId::new("c3"));
        assert_eq!(locks.len(), 3);

        locks.forget_agent(&agent_id);
        assert_eq!(locks.len(), 1);
    }
}
