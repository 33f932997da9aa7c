//! Outbox for fire-and-forget remote writes.
//!
//! Delivery contract: each enqueued [`SyncOp`] is applied to the remote
//! store at most once, in enqueue order. A failed write is logged and
//! counted, never retried, and never reported back to the code that
//! enqueued it. Enqueueing is synchronous and cannot fail, so it is safe to
//! call while holding a state lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, GroupId, NodeId, TimerId};
use threadline_core::store::{ArcStateRecord, RemoteStore, SessionRecord, TimerRecord};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One remote mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    /// Upsert an actor session.
    PutSession(SessionRecord),
    /// Delete an actor session.
    DeleteSession(ActorId),
    /// Record a (node, choice) lock.
    LockChoice {
        /// Lock owner.
        actor: ActorId,
        /// Node of the lock.
        node: NodeId,
        /// Locked choice.
        choice: ChoiceId,
    },
    /// Drop every lock an actor holds at a node.
    UnlockNode {
        /// Lock owner.
        actor: ActorId,
        /// Node being revisited.
        node: NodeId,
    },
    /// Record a vote.
    PutVote {
        /// Voter.
        actor: ActorId,
        /// Timed node.
        node: NodeId,
        /// Chosen option.
        choice: ChoiceId,
    },
    /// Remove a vote.
    ClearVote {
        /// Voter.
        actor: ActorId,
        /// Timed node.
        node: NodeId,
    },
    /// Upsert a timer.
    PutTimer {
        /// Timer owner.
        actor: ActorId,
        /// Timer state.
        record: TimerRecord,
    },
    /// Remove a timer.
    ClearTimer {
        /// Timer owner.
        actor: ActorId,
        /// Timer to remove.
        timer: TimerId,
    },
    /// Upsert a group's split state.
    PutArcState(ArcStateRecord),
    /// Delete a group's split state.
    DeleteArcState(GroupId),
}

impl SyncOp {
    /// Type name for logging.
    #[must_use]
    pub fn op_type(&self) -> &'static str {
        match self {
            Self::PutSession(_) => "sync.put_session",
            Self::DeleteSession(_) => "sync.delete_session",
            Self::LockChoice { .. } => "sync.lock_choice",
            Self::UnlockNode { .. } => "sync.unlock_node",
            Self::PutVote { .. } => "sync.put_vote",
            Self::ClearVote { .. } => "sync.clear_vote",
            Self::PutTimer { .. } => "sync.put_timer",
            Self::ClearTimer { .. } => "sync.clear_timer",
            Self::PutArcState(_) => "sync.put_arc_state",
            Self::DeleteArcState(_) => "sync.delete_arc_state",
        }
    }

    async fn apply(&self, store: &dyn RemoteStore) -> Result<(), DomainError> {
        match self {
            Self::PutSession(record) => store.put_session(record).await,
            Self::DeleteSession(actor) => store.delete_session(actor).await,
            Self::LockChoice {
                actor,
                node,
                choice,
            } => store.lock_choice(actor, node, choice).await,
            Self::UnlockNode { actor, node } => store.unlock_node(actor, node).await,
            Self::PutVote {
                actor,
                node,
                choice,
            } => store.put_vote(actor, node, choice).await,
            Self::ClearVote { actor, node } => store.clear_vote(actor, node).await,
            Self::PutTimer { actor, record } => store.put_timer(actor, record).await,
            Self::ClearTimer { actor, timer } => store.clear_timer(actor, timer).await,
            Self::PutArcState(record) => store.put_arc_state(record).await,
            Self::DeleteArcState(group) => store.delete_arc_state(group).await,
        }
    }
}

/// Sending half of the outbox. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<SyncOp>,
}

impl Outbox {
    /// Creates an outbox and the worker that drains it into `store`.
    #[must_use]
    pub fn channel(store: Arc<dyn RemoteStore>) -> (Self, OutboxWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = OutboxWorker {
            rx,
            store,
            stats: Arc::new(SyncStats::default()),
        };
        (Self { tx }, worker)
    }

    /// Queues `op` for the remote store. Never blocks and never fails; if the
    /// worker has shut down the op is dropped with a warning.
    pub fn enqueue(&self, op: SyncOp) {
        let op_type = op.op_type();
        if self.tx.send(op).is_err() {
            tracing::warn!(op_type, "outbox worker gone; dropping remote write");
        }
    }
}

/// Delivery counters for the outbox.
#[derive(Debug, Default)]
pub struct SyncStats {
    applied: AtomicU64,
    failed: AtomicU64,
}

impl SyncStats {
    /// Ops the remote store accepted.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Ops the remote store rejected; these are not retried.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Receiving half of the outbox; applies ops to the remote store.
pub struct OutboxWorker {
    rx: mpsc::UnboundedReceiver<SyncOp>,
    store: Arc<dyn RemoteStore>,
    stats: Arc<SyncStats>,
}

impl std::fmt::Debug for OutboxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxWorker")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl OutboxWorker {
    /// Shared handle to the delivery counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    async fn apply(&self, op: SyncOp) {
        match op.apply(self.store.as_ref()).await {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(op_type = op.op_type(), "remote write applied");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(op_type = op.op_type(), error = %e, "remote write failed; not retried");
            }
        }
    }

    /// Applies every op queued right now and returns how many were processed.
    pub async fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(op) = self.rx.try_recv() {
            self.apply(op).await;
            processed += 1;
        }
        processed
    }

    /// Applies ops as they arrive until `shutdown` flips to `true` (or its
    /// sender is dropped), then flushes what is still queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                op = self.rx.recv() => match op {
                    Some(op) => self.apply(op).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        let flushed = self.drain().await;
        tracing::info!(
            flushed,
            applied = self.stats.applied(),
            failed = self.stats.failed(),
            "outbox worker stopped"
        );
    }

    /// Spawns [`OutboxWorker::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryRemoteStore;
    use threadline_core::ids::StoryId;
    use threadline_test_support::FailingRemoteStore;

    fn session_record(actor: &str) -> SessionRecord {
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
    async fn test_drain_applies_ops_in_enqueue_order() {
        // Arrange
        let store = Arc::new(InMemoryRemoteStore::new());
        let (outbox, mut worker) = Outbox::channel(store.clone());
        let actor = ActorId::new("a");

        // Act
        outbox.enqueue(SyncOp::PutSession(session_record("a")));
        outbox.enqueue(SyncOp::LockChoice {
            actor: actor.clone(),
            node: NodeId::new("n1"),
            choice: ChoiceId::new("x"),
        });
        let processed = worker.drain().await;

        // Assert
        assert_eq!(processed, 2);
        assert_eq!(worker.stats().applied(), 2);
        assert!(
            store
                .is_locked(&actor, &NodeId::new("n1"), &ChoiceId::new("x"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_write_is_counted_and_not_retried() {
        // Arrange
        let store = Arc::new(FailingRemoteStore::new());
        let (outbox, mut worker) = Outbox::channel(store.clone());

        // Act
        outbox.enqueue(SyncOp::DeleteSession(ActorId::new("a")));
        worker.drain().await;
        let second = worker.drain().await;

        // Assert
        assert_eq!(second, 0);
        assert_eq!(worker.stats().failed(), 1);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_dropped_does_not_panic() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let (outbox, worker) = Outbox::channel(store);
        drop(worker);

        outbox.enqueue(SyncOp::DeleteArcState(GroupId::new("g")));
    }

    #[tokio::test]
    async fn test_run_flushes_queue_on_shutdown() {
        // Arrange
        let store = Arc::new(InMemoryRemoteStore::new());
        let (outbox, worker) = Outbox::channel(store.clone());
        let stats = worker.stats();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        outbox.enqueue(SyncOp::PutSession(session_record("a")));
        outbox.enqueue(SyncOp::PutSession(session_record("b")));

        // Act
        let handle = worker.spawn(shutdown_rx);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Assert
        assert_eq!(stats.applied(), 2);
        assert!(store.get_session(&ActorId::new("b")).await.unwrap().is_some());
    }
}
