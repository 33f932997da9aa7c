//! Choice lock ledger.
//!
//! Locks make choice submission idempotent: the first lock of a
//! (node, choice) pair for an actor wins, and every later one is a no-op
//! the caller can detect and discard.

use std::sync::Arc;

use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, NodeId};
use threadline_sync::outbox::SyncOp;

use super::store::SessionStore;

/// Per-actor set of locked (node, choice) pairs.
#[derive(Debug, Clone)]
pub struct ChoiceLedger {
    store: Arc<SessionStore>,
}

impl ChoiceLedger {
    /// Creates a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Whether `actor` has locked `choice` at `node`. Unknown actors hold no
    /// locks.
    #[must_use]
    pub fn is_locked(&self, actor: &ActorId, node: &NodeId, choice: &ChoiceId) -> bool {
        self.store
            .sessions()
            .get(actor)
            .is_some_and(|s| s.is_locked(node, choice))
    }

    /// Locks `choice` at `node` for `actor`. Returns `true` only for the call
    /// that created the lock; the check and the insert happen under one
    /// guard, so concurrent submissions see exactly one `true`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub fn lock(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<bool, DomainError> {
        self.store.with_session(actor, |session, outbox| {
            let newly = session.lock(node.clone(), choice.clone());
            if newly {
                outbox.enqueue(SyncOp::LockChoice {
                    actor: actor.clone(),
                    node: node.clone(),
                    choice: choice.clone(),
                });
            } else {
                tracing::debug!(actor = %actor, node = %node, choice = %choice, "duplicate choice absorbed");
            }
            newly
        })
    }

    /// Same as [`ChoiceLedger::lock`]; reads better at call sites that branch
    /// on the outcome.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub fn try_lock(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<bool, DomainError> {
        self.lock(actor, node, choice)
    }

    /// Forgets the locks `actor` holds at `node`, so a revisit of the node
    /// can be answered again.
    pub fn reset_node(&self, actor: &ActorId, node: &NodeId) {
        let reset = self.store.with_session(actor, |session, outbox| {
            if session.reset_node_locks(node) {
                outbox.enqueue(SyncOp::UnlockNode {
                    actor: actor.clone(),
                    node: node.clone(),
                });
            }
        });
        if let Err(e) = reset {
            tracing::warn!(actor = %actor, node = %node, error = %e, "node locks not reset");
        }
    }
}
