//! Authoritative remote store abstraction.
//!
//! The remote store mirrors the in-process state and is used to rebuild it
//! after a restart. It only guarantees the actor-session-level fields; locks,
//! votes and timers are mirrored too, but restore does not read them back.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ActorId, ChoiceId, GroupId, NodeId, StoryId, TimerId};

/// The last message surface an actor is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSurface {
    /// Channel the message lives in.
    pub channel_id: String,
    /// Message identifier.
    pub message_id: String,
    /// When the surface was last set.
    pub updated_at: DateTime<Utc>,
}

/// Stored representation of an actor session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owning actor.
    pub actor_id: ActorId,
    /// Active story.
    pub story_id: StoryId,
    /// Current node.
    pub current_node_id: NodeId,
    /// Resolved choices in order.
    pub choices: Vec<ChoiceId>,
    /// Boolean flags.
    pub flags: BTreeMap<String, bool>,
    /// Non-negative resources.
    pub resources: BTreeMap<String, u32>,
    /// Held items.
    pub items: BTreeSet<String>,
    /// Visited checkpoints.
    pub checkpoints: Vec<NodeId>,
    /// Party role.
    pub role: Option<String>,
    /// Last viewed message surface.
    pub active_surface: Option<MessageSurface>,
}

/// Stored representation of a per-actor deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    /// Timer identifier.
    pub timer_id: TimerId,
    /// Node the timer is bound to.
    pub node_id: NodeId,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Duration in seconds.
    pub duration_seconds: u32,
}

impl TimerRecord {
    /// The instant the timer expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::seconds(i64::from(self.duration_seconds))
    }
}

/// Stored representation of a group's split state.
///
/// The split itself is owned by the arc coordinator; the store only keeps it
/// as an opaque JSON payload keyed by group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcStateRecord {
    /// Owning group.
    pub group_id: GroupId,
    /// Split node that created the state.
    pub split_node_id: NodeId,
    /// Serialized split state.
    pub payload: serde_json::Value,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}

/// CRUD access to the authoritative remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Loads a session.
    async fn get_session(&self, actor: &ActorId) -> Result<Option<SessionRecord>, DomainError>;

    /// Upserts a session.
    async fn put_session(&self, record: &SessionRecord) -> Result<(), DomainError>;

    /// Deletes a session and everything hanging off it.
    async fn delete_session(&self, actor: &ActorId) -> Result<(), DomainError>;

    /// Loads a group's split state.
    async fn get_arc_state(&self, group: &GroupId) -> Result<Option<ArcStateRecord>, DomainError>;

    /// Upserts a group's split state.
    async fn put_arc_state(&self, record: &ArcStateRecord) -> Result<(), DomainError>;

    /// Deletes a group's split state.
    async fn delete_arc_state(&self, group: &GroupId) -> Result<(), DomainError>;

    /// Loads the vote an actor cast at a node.
    async fn get_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
    ) -> Result<Option<ChoiceId>, DomainError>;

    /// Records the vote an actor cast at a node.
    async fn put_vote(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError>;

    /// Removes the vote an actor cast at a node.
    async fn clear_vote(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError>;

    /// Loads a timer.
    async fn get_timer(
        &self,
        actor: &ActorId,
        timer: &TimerId,
    ) -> Result<Option<TimerRecord>, DomainError>;

    /// Upserts a timer.
    async fn put_timer(&self, actor: &ActorId, record: &TimerRecord) -> Result<(), DomainError>;

    /// Removes a timer.
    async fn clear_timer(&self, actor: &ActorId, timer: &TimerId) -> Result<(), DomainError>;

    /// Records a (node, choice) lock. Upsert semantics.
    async fn lock_choice(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<(), DomainError>;

    /// Whether a (node, choice) lock exists.
    async fn is_locked(
        &self,
        actor: &ActorId,
        node: &NodeId,
        choice: &ChoiceId,
    ) -> Result<bool, DomainError>;

    /// Removes every lock an actor holds at a node.
    async fn unlock_node(&self, actor: &ActorId, node: &NodeId) -> Result<(), DomainError>;
}
