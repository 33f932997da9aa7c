//! The in-process session store.
//!
//! Local state is the source of truth for every decision. Each change is
//! applied here first and then handed to the outbox for the remote mirror;
//! a failing remote never blocks or rolls back a local write.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use threadline_core::clock::SharedClock;
use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, NodeId, StoryId};
use threadline_sync::outbox::{Outbox, SyncOp};
use threadline_sync::reconcile::Reconciler;

use crate::domain::session::ActorSession;

/// Keyed collection of actor sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<ActorId, ActorSession>>,
    outbox: Outbox,
    reconciler: Reconciler,
    clock: SharedClock,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions().len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(outbox: Outbox, reconciler: Reconciler, clock: SharedClock) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            outbox,
            reconciler,
            clock,
        }
    }

    /// The clock every deadline in this store is measured against.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub(crate) fn sessions(&self) -> MutexGuard<'_, HashMap<ActorId, ActorSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the session of `actor` without mirroring the
    /// session record. Callers push their own, narrower sync op.
    pub(crate) fn with_session<R>(
        &self,
        actor: &ActorId,
        f: impl FnOnce(&mut ActorSession, &Outbox) -> R,
    ) -> Result<R, DomainError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(actor)
            .ok_or_else(|| DomainError::NotFound(format!("session for {actor}")))?;
        Ok(f(session, &self.outbox))
    }

    /// Starts (or restarts) `actor` on `story` at `entry`.
    pub fn start(&self, actor: ActorId, story: StoryId, entry: NodeId) -> ActorSession {
        let session = ActorSession::new(actor.clone(), story, entry);
        self.sessions().insert(actor, session.clone());
        self.outbox.enqueue(SyncOp::PutSession(session.to_record()));
        tracing::info!(
            actor = %session.actor_id(),
            story = %session.story_id(),
            node = %session.current_node_id(),
            "session started"
        );
        session
    }

    /// A snapshot of the session of `actor`.
    #[must_use]
    pub fn get(&self, actor: &ActorId) -> Option<ActorSession> {
        self.sessions().get(actor).cloned()
    }

    /// Whether `actor` has a local session.
    #[must_use]
    pub fn contains(&self, actor: &ActorId) -> bool {
        self.sessions().contains_key(actor)
    }

    /// Actors with a local session.
    #[must_use]
    pub fn actors(&self) -> Vec<ActorId> {
        self.sessions().keys().cloned().collect()
    }

    /// Ends the session of `actor`; the remote delete cascades to its locks,
    /// votes and timers.
    pub fn end(&self, actor: &ActorId) -> Option<ActorSession> {
        let removed = self.sessions().remove(actor);
        if removed.is_some() {
            self.outbox.enqueue(SyncOp::DeleteSession(actor.clone()));
            tracing::info!(actor = %actor, "session ended");
        }
        removed
    }

    /// Applies `f` to the session of `actor` and mirrors the result.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub fn update<R>(
        &self,
        actor: &ActorId,
        f: impl FnOnce(&mut ActorSession) -> R,
    ) -> Result<R, DomainError> {
        self.with_session(actor, |session, outbox| {
            let out = f(session);
            outbox.enqueue(SyncOp::PutSession(session.to_record()));
            out
        })
    }

    /// Records the vote `actor` cast at `node`. Returns the prior vote if one
    /// exists, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub fn record_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<Option<ChoiceId>, DomainError> {
        self.with_session(actor, |session, outbox| {
            let prior = session.set_vote(node.clone(), choice.clone());
            if prior.is_none() {
                outbox.enqueue(SyncOp::PutVote {
                    actor: actor.clone(),
                    node: node.clone(),
                    choice: choice.clone(),
                });
            }
            prior
        })
    }

    /// Drops the vote `actor` cast at `node`, if any.
    pub fn clear_vote(&self, actor: &ActorId, node: &NodeId) {
        let cleared = self.with_session(actor, |session, outbox| {
            if session.clear_vote(node) {
                outbox.enqueue(SyncOp::ClearVote {
                    actor: actor.clone(),
                    node: node.clone(),
                });
            }
        });
        if let Err(e) = cleared {
            tracing::warn!(actor = %actor, node = %node, error = %e, "vote not cleared");
        }
    }

    /// Returns the local session of `actor`, rebuilding it from the remote
    /// store on a miss. A session created locally while the remote read was
    /// in flight wins over the fetched one.
    pub async fn restore(&self, actor: &ActorId) -> Option<ActorSession> {
        if let Some(session) = self.get(actor) {
            return Some(session);
        }
        let record = self.reconciler.fetch_session(actor).await?;
        let mut sessions = self.sessions();
        let session = sessions
            .entry(actor.clone())
            .or_insert_with(|| {
                tracing::info!(actor = %actor, node = %record.current_node_id, "session restored from remote");
                ActorSession::from_record(record)
            })
            .clone();
        Some(session)
    }
}
