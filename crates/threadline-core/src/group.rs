//! Group membership provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ActorId, GroupId};

/// Lifecycle of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Members are still joining; the traversal has not started.
    Forming,
    /// The traversal is under way.
    Active,
    /// The group has ended.
    Disbanded,
}

/// Membership state of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Participating.
    Active,
    /// Invited but not yet joined.
    Pending,
    /// Left the group.
    Left,
}

/// One member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The member's actor id.
    pub actor_id: ActorId,
    /// Party role, used by role-based arc splits.
    #[serde(default)]
    pub role: Option<String>,
    /// Membership state.
    pub status: MemberStatus,
}

/// A set of actors sharing a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier.
    pub id: GroupId,
    /// Leader; breaks vote ties.
    pub leader_id: ActorId,
    /// Lifecycle state.
    pub status: GroupStatus,
    /// Members in join order.
    pub members: Vec<Member>,
}

impl Group {
    /// Whether the traversal is under way.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    /// Active members in join order.
    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|m| m.status == MemberStatus::Active)
    }

    /// Actor ids of the active members.
    #[must_use]
    pub fn active_actor_ids(&self) -> Vec<ActorId> {
        self.active_members().map(|m| m.actor_id.clone()).collect()
    }

    /// Whether `actor` is an active member.
    #[must_use]
    pub fn is_active_member(&self, actor: &ActorId) -> bool {
        self.active_members().any(|m| &m.actor_id == actor)
    }
}

/// Source of truth for group membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// The group `actor` currently belongs to, if any.
    async fn group_of(&self, actor: &ActorId) -> Result<Option<Group>, DomainError>;
}
