//! Test remote stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, GroupId, NodeId, TimerId};
use threadline_core::store::{ArcStateRecord, RemoteStore, SessionRecord, TimerRecord};

/// A remote store that always returns an infrastructure error and counts
/// how often it was called. Useful for testing the local-first paths.
#[derive(Debug, Default)]
pub struct FailingRemoteStore {
    calls: AtomicUsize,
}

impl FailingRemoteStore {
    /// Creates a store with a zeroed call counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DomainError::RemoteSync("connection refused".into()))
    }
}

#[async_trait]
impl RemoteStore for FailingRemoteStore {
    async fn get_session(&self, _actor: &ActorId) -> Result<Option<SessionRecord>, DomainError> {
        self.fail()
    }

    async fn put_session(&self, _record: &SessionRecord) -> Result<(), DomainError> {
        self.fail()
    }

    async fn delete_session(&self, _actor: &ActorId) -> Result<(), DomainError> {
        self.fail()
    }

    async fn get_arc_state(
        &self,
        _group: &GroupId,
    ) -> Result<Option<ArcStateRecord>, DomainError> {
        self.fail()
    }

    async fn put_arc_state(&self, _record: &ArcStateRecord) -> Result<(), DomainError> {
        self.fail()
    }

    async fn delete_arc_state(&self, _group: &GroupId) -> Result<(), DomainError> {
        self.fail()
    }

    async fn get_vote(
        &self,
        _actor: &ActorId,
        _node: &NodeId,
    ) -> Result<Option<ChoiceId>, DomainError> {
        self.fail()
    }

    async fn put_vote(
        &self,
        _actor: &ActorId,
        _node: &NodeId,
        _choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        self.fail()
    }

    async fn clear_vote(&self, _actor: &ActorId, _node: &NodeId) -> Result<(), DomainError> {
        self.fail()
    }

    async fn get_timer(
        &self,
        _actor: &ActorId,
        _timer: &TimerId,
    ) -> Result<Option<TimerRecord>, DomainError> {
        self.fail()
    }

    async fn put_timer(&self, _actor: &ActorId, _record: &TimerRecord) -> Result<(), DomainError> {
        self.fail()
    }

    async fn clear_timer(&self, _actor: &ActorId, _timer: &TimerId) -> Result<(), DomainError> {
        self.fail()
    }

    async fn lock_choice(
        &self,
        _actor: &ActorId,
        _node: &NodeId,
        _choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        self.fail()
    }

    async fn is_locked(
        &self,
        _actor: &ActorId,
        _node: &NodeId,
        _choice: &ChoiceId,
    ) -> Result<bool, DomainError> {
        self.fail()
    }

    async fn unlock_node(&self, _actor: &ActorId, _node: &NodeId) -> Result<(), DomainError> {
        self.fail()
    }
}

/// Wraps a working store and fails its first few arc-state reads, as a
/// connection that drops right after a restart would.
pub struct FlakyRemoteStore {
    inner: Arc<dyn RemoteStore>,
    arc_state_failures: AtomicUsize,
}

impl std::fmt::Debug for FlakyRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyRemoteStore")
            .field("arc_state_failures", &self.arc_state_failures)
            .finish_non_exhaustive()
    }
}

impl FlakyRemoteStore {
    /// Delegates to `inner` once `failures` arc-state reads have failed.
    #[must_use]
    pub fn new(inner: Arc<dyn RemoteStore>, failures: usize) -> Self {
        Self {
            inner,
            arc_state_failures: AtomicUsize::new(failures),
        }
    }

    /// Arc-state reads still set to fail.
    pub fn failures_left(&self) -> usize {
        self.arc_state_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemoteStore {
    async fn get_session(&self, actor: &ActorId) -> Result<Option<SessionRecord>, DomainError> {
        self.inner.get_session(actor).await
    }

    async fn put_session(&self, record: &SessionRecord) -> Result<(), DomainError> {
        self.inner.put_session(record).await
    }

    async fn delete_session(&self, actor: &ActorId) -> Result<(), DomainError> {
        self.inner.delete_session(actor).await
    }

    async fn get_arc_state(&self, group: &GroupId) -> Result<Option<ArcStateRecord>, DomainError> {
        let failing = self
            .arc_state_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DomainError::RemoteSync("connection reset".into()));
        }
        self.inner.get_arc_state(group).await
    }

    async fn put_arc_state(&self, record: &ArcStateRecord) -> Result<(), DomainError> {
        self.inner.put_arc_state(record).await
    }

    async fn delete_arc_state(&self, group: &GroupId) -> Result<(), DomainError> {
        self.inner.delete_arc_state(group).await
    }

    async fn get_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
    ) -> Result<Option<ChoiceId>, DomainError> {
        self.inner.get_vote(actor, node).await
    }

    async fn put_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        self.inner.put_vote(actor, node, choice).await
    }

    async fn clear_vote(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError> {
        self.inner.clear_vote(actor, node).await
    }

    async fn get_timer(
        &self,
        actor: &ActorId,
        timer: &TimerId,
    ) -> Result<Option<TimerRecord>, DomainError> {
        self.inner.get_timer(actor, timer).await
    }

    async fn put_timer(&self, actor: &ActorId, record: &TimerRecord) -> Result<(), DomainError> {
        self.inner.put_timer(actor, record).await
    }

    async fn clear_timer(&self, actor: &ActorId, timer: &TimerId) -> Result<(), DomainError> {
        self.inner.clear_timer(actor, timer).await
    }

    async fn lock_choice(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError> {
        self.inner.lock_choice(actor, node, choice).await
    }

    async fn is_locked(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<bool, DomainError> {
        self.inner.is_locked(actor, node, choice).await
    }

    async fn unlock_node(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError> {
        self.inner.unlock_node(actor, node).await
    }
}
