//! In-process implementation of the `RemoteStore` trait.
//!
//! Mirrors the relational layout of the hosted store: locks, votes and
//! timers hang off a session and are rejected when the session does not
//! exist. Deleting a session cascades to them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, GroupId, NodeId, TimerId};
use threadline_core::store::{ArcStateRecord, RemoteStore, SessionRecord, TimerRecord};

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<ActorId, SessionRecord>,
    arc_states: HashMap<GroupId, ArcStateRecord>,
    votes: HashMap<(ActorId, NodeId), ChoiceId>,
    timers: HashMap<(ActorId, TimerId), TimerRecord>,
    locks: HashSet<(ActorId, NodeId, ChoiceId)>,
}

impl Tables {
    fn require_session(&self, actor: &ActorId) -> Result<(), DomainError> {
        if self.sessions.contains_key(actor) {
            Ok(())
        } else {
            Err(DomainError::NotFound(format!("remote session for {actor}")))
        }
    }
}

/// Map-backed remote store.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    tables: Mutex<Tables>,
}

impl InMemoryRemoteStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.tables().sessions.len()
    }

    /// Number of stored votes.
    pub fn vote_count(&self) -> usize {
        self.tables().votes.len()
    }

    /// Number of stored timers.
    pub fn timer_count(&self) -> usize {
        self.tables().timers.len()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get_session(&self, actor: &ActorId) -> Result<Option<SessionRecord>, DomainError> {
        Ok(self.tables().sessions.get(actor).cloned())
    }

    async fn put_session(&self, record: &SessionRecord) -> Result<(), DomainError> {
        self.tables()
            .sessions
            .insert(record.actor_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_session(&self, actor: &ActorId) -> Result<(), DomainError> {
        let mut tables = self.tables();
        tables.sessions.remove(actor);
        tables.votes.retain(|(a, _), _| a != actor);
        tables.timers.retain(|(a, _), _| a != actor);
        tables.locks.retain(|(a, _, _)| a != actor);
        Ok(())
    }

    async fn get_arc_state(&self, group: &GroupId) -> Result<Option<ArcStateRecord>, DomainError> {
        Ok(self.tables().arc_states.get(group).cloned())
    }

    async fn put_arc_state(&self, record: &ArcStateRecord) -> Result<(), DomainError> {
        self.tables()
            .arc_states
            .insert(record.group_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_arc_state(&self, group: &GroupId) -> Result<(), DomainError> {
        self.tables().arc_states.remove(group);
        Ok(())
    }

    async fn get_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
    ) -> Result<Option<ChoiceId>, DomainError> {
        Ok(self
            .tables()
            .votes
            .get(&(actor.clone(), node.clone()))
            .cloned())
    }

    async fn put_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        let mut tables = self.tables();
        tables.require_session(actor)?;
        tables
            .votes
            .insert((actor.clone(), node.clone()), choice.clone());
        Ok(())
    }

    async fn clear_vote(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError> {
        self.tables().votes.remove(&(actor.clone(), node.clone()));
        Ok(())
    }

    async fn get_timer(
        &self,
        actor: &ActorId,
        timer: &TimerId,
    ) -> Result<Option<TimerRecord>, DomainError> {
        Ok(self
            .tables()
            .timers
            .get(&(actor.clone(), timer.clone()))
            .cloned())
    }

    async fn put_timer(&self, actor: &ActorId, record: &TimerRecord) -> Result<(), DomainError> {
        let mut tables = self.tables();
        tables.require_session(actor)?;
        tables
            .timers
            .insert((actor.clone(), record.timer_id.clone()), record.clone());
        Ok(())
    }

    async fn clear_timer(&self, actor: &ActorId, timer: &TimerId) -> Result<(), DomainError> {
        self.tables().timers.remove(&(actor.clone(), timer.clone()));
        Ok(())
    }

    async fn lock_choice(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        let mut tables = self.tables();
        tables.require_session(actor)?;
        tables
            .locks
            .insert((actor.clone(), node.clone(), choice.clone()));
        Ok(())
    }

    async fn is_locked(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<bool, DomainError> {
        Ok(self
            .tables()
            .locks
            .contains(&(actor.clone(), node.clone(), choice.clone())))
    }

    async fn unlock_node(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError> {
        self.tables()
            .locks
            .retain(|(a, n, _)| a != actor || n != node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::ids::StoryId;

    fn record(actor: &str) -> SessionRecord {
        SessionRecord {
            actor_id: ActorId::new(actor),
            story_id: StoryId::new("s"),
            current_node_id: NodeId::new("n1"),
            choices: Vec::new(),
            flags: Default::default(),
            resources: Default::default(),
            items: Default::default(),
            checkpoints: Vec::new(),
            role: None,
            active_surface: None,
        }
    }

    #[tokio::test]
    async fn test_lock_without_session_is_rejected() {
        let store = InMemoryRemoteStore::new();
        let result = store
            .lock_choice(&ActorId::new("a"), &NodeId::new("n"), &ChoiceId::new("c"))
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_session_cascades_to_votes_and_locks() {
        // Arrange
        let store = InMemoryRemoteStore::new();
        let actor = ActorId::new("a");
        let node = NodeId::new("n");
        store.put_session(&record("a")).await.unwrap();
        store
            .put_vote(&actor, &node, &ChoiceId::new("x"))
            .await
            .unwrap();
        store
            .lock_choice(&actor, &node, &ChoiceId::new("x"))
            .await
            .unwrap();

        // Act
        store.delete_session(&actor).await.unwrap();

        // Assert
        assert_eq!(store.session_count(), 0);
        assert_eq!(store.vote_count(), 0);
        assert!(
            !store
                .is_locked(&actor, &node, &ChoiceId::new("x"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_lock_is_upsert() {
        let store = InMemoryRemoteStore::new();
        let actor = ActorId::new("a");
        store.put_session(&record("a")).await.unwrap();
        for _ in 0..2 {
            store
                .lock_choice(&actor, &NodeId::new("n"), &ChoiceId::new("c"))
                .await
                .unwrap();
        }
        assert_eq!(store.tables().locks.len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_node_only_touches_that_node() {
        // Arrange
        let store = InMemoryRemoteStore::new();
        let actor = ActorId::new("a");
        store.put_session(&record("a")).await.unwrap();
        for node in ["n1", "n2"] {
            store
                .lock_choice(&actor, &NodeId::new(node), &ChoiceId::new("c"))
                .await
                .unwrap();
        }

        // Act
        store.unlock_node(&actor, &NodeId::new("n1")).await.unwrap();

        // Assert
        let c = ChoiceId::new("c");
        assert!(!store.is_locked(&actor, &NodeId::new("n1"), &c).await.unwrap());
        assert!(store.is_locked(&actor, &NodeId::new("n2"), &c).await.unwrap());
    }
}
