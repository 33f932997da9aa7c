//! Arc records and split state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threadline_core::ids::{ActorId, ArcId, GroupId, NodeId};
use uuid::Uuid;

/// Progress of one arc toward the merge node. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcStatus {
    /// Members are still traversing the arc.
    Active,
    /// The arc has reached the merge node.
    WaitingAtMerge,
    /// The merge completed.
    Completed,
}

impl ArcStatus {
    /// The later of `self` and `to`.
    #[must_use]
    pub fn advance(self, to: Self) -> Self {
        self.max(to)
    }
}

/// One arc of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcRecord {
    /// Arc id from the split config.
    pub arc_id: ArcId,
    /// Display label.
    pub label: String,
    /// Optional flavour text.
    #[serde(default)]
    pub description: Option<String>,
    /// Members in assignment order.
    pub members: Vec<ActorId>,
    /// First node of the arc.
    pub entry_node_id: NodeId,
    /// Node the arc's members last entered.
    pub current_node_id: NodeId,
    /// Progress toward the merge node.
    pub status: ArcStatus,
    /// When the split was made.
    pub started_at: DateTime<Utc>,
}

impl ArcRecord {
    /// A single-member arc. Choices inside it never go to a vote.
    #[must_use]
    pub fn is_solo(&self) -> bool {
        self.members.len() == 1
    }

    /// Whether `actor` was assigned to this arc.
    #[must_use]
    pub fn has_member(&self, actor: &ActorId) -> bool {
        self.members.contains(actor)
    }
}

/// A group's current split. Arcs keep declaration order and never include
/// an arc without members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcSplitState {
    /// Split episode id; a new split at another node gets a new one.
    pub id: Uuid,
    /// Group that was split.
    pub group_id: GroupId,
    /// Node that triggered the split.
    pub split_node_id: NodeId,
    /// Node where the arcs converge.
    pub merge_node_id: NodeId,
    /// Arcs with at least one member.
    pub arcs: Vec<ArcRecord>,
    /// When the split was made.
    pub created_at: DateTime<Utc>,
}

impl ArcSplitState {
    /// The arc with id `arc`.
    #[must_use]
    pub fn arc(&self, arc: &ArcId) -> Option<&ArcRecord> {
        self.arcs.iter().find(|a| &a.arc_id == arc)
    }

    pub(crate) fn arc_mut(&mut self, arc: &ArcId) -> Option<&mut ArcRecord> {
        self.arcs.iter_mut().find(|a| &a.arc_id == arc)
    }

    /// The arc `actor` was assigned to.
    #[must_use]
    pub fn arc_of(&self, actor: &ActorId) -> Option<&ArcRecord> {
        self.arcs.iter().find(|a| a.has_member(actor))
    }

    pub(crate) fn arc_of_mut(&mut self, actor: &ActorId) -> Option<&mut ArcRecord> {
        self.arcs.iter_mut().find(|a| a.has_member(actor))
    }

    /// True iff every retained arc is waiting at the merge node.
    #[must_use]
    pub fn all_at_merge(&self) -> bool {
        self.arcs
            .iter()
            .all(|a| a.status >= ArcStatus::WaitingAtMerge)
    }

    /// Arcs that have not reached the merge node yet.
    #[must_use]
    pub fn pending_arcs(&self) -> Vec<ArcId> {
        self.arcs
            .iter()
            .filter(|a| a.status == ArcStatus::Active)
            .map(|a| a.arc_id.clone())
            .collect()
    }

    /// Moves every arc to `Completed`. Called once, when the merge ends the
    /// split.
    pub(crate) fn mark_completed(&mut self) {
        for arc in &mut self.arcs {
            arc.status = arc.status.advance(ArcStatus::Completed);
        }
    }

    /// Every member of every arc, in arc order.
    #[must_use]
    pub fn members(&self) -> Vec<ActorId> {
        self.arcs.iter().flat_map(|a| a.members.iter().cloned()).collect()
    }
}
