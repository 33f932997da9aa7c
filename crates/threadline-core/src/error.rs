//! Domain error types.

use thiserror::Error;

use crate::ids::{ArcId, GroupId, NodeId};

/// Top-level domain error type.
///
/// Duplicate locks and duplicate votes are deliberately absent: replaying an
/// input is absorbed by the component that sees it and reported as an
/// ordinary outcome.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed input or configuration. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The addressed session, split state or vote does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),

    /// A merge was requested before every retained arc reached the merge node.
    #[error("group {group_id} is not ready to merge; waiting on {pending:?}")]
    NotReady {
        /// The group whose merge was requested.
        group_id: GroupId,
        /// Arcs that have not reached the merge node yet.
        pending: Vec<ArcId>,
    },

    /// A timed vote closed without a single ballot.
    #[error("no quorum at node {node_id}: the deadline passed without votes")]
    NoQuorum {
        /// The timed node that closed empty.
        node_id: NodeId,
    },

    /// The authoritative remote store could not be read or written.
    #[error("remote sync error: {0}")]
    RemoteSync(String),
}

impl DomainError {
    /// True for outcomes the caller is expected to re-poll rather than report.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}
