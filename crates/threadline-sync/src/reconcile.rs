//! Read side of the reconciliation layer.
//!
//! Session restores are best effort: a remote failure is logged and reported
//! as a miss, leaving the caller to continue with whatever it has locally.
//! Arc-state restores hand the failure back so the caller can try again.

use std::sync::Arc;

use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, GroupId};
use threadline_core::store::{ArcStateRecord, RemoteStore, SessionRecord};

/// Reads remote records back on a local cache miss.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// The remote session of `actor`, or `None` on a miss or a remote error.
    pub async fn fetch_session(&self, actor: &ActorId) -> Option<SessionRecord> {
        match self.store.get_session(actor).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(actor = %actor, error = %e, "session restore failed");
                None
            }
        }
    }

    /// The remote split state of `group`, or `None` on a miss.
    ///
    /// # Errors
    ///
    /// Returns the remote store's error so the lookup can be retried later.
    pub async fn fetch_arc_state(
        &self,
        group: &GroupId,
    ) -> Result<Option<ArcStateRecord>, DomainError> {
        self.store.get_arc_state(group).await.inspect_err(|e| {
            tracing::warn!(group = %group, error = %e, "arc state restore failed");
        })
    }
}
