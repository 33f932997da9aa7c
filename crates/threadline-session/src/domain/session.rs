//! The per-actor progress record.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use threadline_core::ids::{ActorId, ChoiceId, NodeId, StoryId, TimerId};
use threadline_core::store::{MessageSurface, SessionRecord, TimerRecord};

/// Mutable progress of one actor through one story.
///
/// Lock, vote and timer maps are only reachable through the ledger, the
/// timer registry and the session store, which mirror every change to the
/// remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSession {
    actor_id: ActorId,
    story_id: StoryId,
    current_node_id: NodeId,
    choices: Vec<ChoiceId>,
    flags: BTreeMap<String, bool>,
    resources: BTreeMap<String, u32>,
    items: BTreeSet<String>,
    checkpoints: Vec<NodeId>,
    role: Option<String>,
    locks: HashMap<NodeId, HashSet<ChoiceId>>,
    votes: HashMap<NodeId, ChoiceId>,
    timers: HashMap<TimerId, TimerRecord>,
    active_surface: Option<MessageSurface>,
}

impl ActorSession {
    /// Creates a session positioned at `entry_node_id`.
    #[must_use]
    pub fn new(actor_id: ActorId, story_id: StoryId, entry_node_id: NodeId) -> Self {
        Self {
            actor_id,
            story_id,
            current_node_id: entry_node_id,
            choices: Vec::new(),
            flags: BTreeMap::new(),
            resources: BTreeMap::new(),
            items: BTreeSet::new(),
            checkpoints: Vec::new(),
            role: None,
            locks: HashMap::new(),
            votes: HashMap::new(),
            timers: HashMap::new(),
            active_surface: None,
        }
    }

    /// Rebuilds a session from its remote record. The remote record does not
    /// carry locks, votes or timers, so those start empty.
    #[must_use]
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            actor_id: record.actor_id,
            story_id: record.story_id,
            current_node_id: record.current_node_id,
            choices: record.choices,
            flags: record.flags,
            resources: record.resources,
            items: record.items,
            checkpoints: record.checkpoints,
            role: record.role,
            locks: HashMap::new(),
            votes: HashMap::new(),
            timers: HashMap::new(),
            active_surface: record.active_surface,
        }
    }

    /// The session-level fields mirrored to the remote store.
    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            actor_id: self.actor_id.clone(),
            story_id: self.story_id.clone(),
            current_node_id: self.current_node_id.clone(),
            choices: self.choices.clone(),
            flags: self.flags.clone(),
            resources: self.resources.clone(),
            items: self.items.clone(),
            checkpoints: self.checkpoints.clone(),
            role: self.role.clone(),
            active_surface: self.active_surface.clone(),
        }
    }

    /// Owning actor.
    #[must_use]
    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    /// Active story.
    #[must_use]
    pub fn story_id(&self) -> &StoryId {
        &self.story_id
    }

    /// Current node.
    #[must_use]
    pub fn current_node_id(&self) -> &NodeId {
        &self.current_node_id
    }

    /// Resolved choices in order.
    #[must_use]
    pub fn choices(&self) -> &[ChoiceId] {
        &self.choices
    }

    /// Visited checkpoints in order.
    #[must_use]
    pub fn checkpoints(&self) -> &[NodeId] {
        &self.checkpoints
    }

    /// Party role.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Last viewed message surface.
    #[must_use]
    pub fn active_surface(&self) -> Option<&MessageSurface> {
        self.active_surface.as_ref()
    }

    /// Whether `flag` is set.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    /// Whether `item` is held.
    #[must_use]
    pub fn has_item(&self, item: &str) -> bool {
        self.items.contains(item)
    }

    /// Current amount of `resource`; absent resources are zero.
    #[must_use]
    pub fn resource(&self, resource: &str) -> u32 {
        self.resources.get(resource).copied().unwrap_or(0)
    }

    /// Whether every resource in `cost` is available.
    #[must_use]
    pub fn can_afford(&self, cost: &BTreeMap<String, u32>) -> bool {
        self.shortfall(cost).is_none()
    }

    /// The first resource in `cost` the actor cannot pay, with the amount
    /// required and available.
    #[must_use]
    pub fn shortfall<'c>(&self, cost: &'c BTreeMap<String, u32>) -> Option<(&'c str, u32, u32)> {
        cost.iter()
            .map(|(name, &required)| (name.as_str(), required, self.resource(name)))
            .find(|&(_, required, available)| available < required)
    }

    /// Appends `choice` to the history and, if given, moves to `next`.
    pub fn record_choice(&mut self, choice: ChoiceId, next: Option<NodeId>) {
        self.choices.push(choice);
        if let Some(next) = next {
            self.current_node_id = next;
        }
    }

    /// Moves to `node` without recording a choice.
    pub fn set_current_node(&mut self, node: NodeId) {
        self.current_node_id = node;
    }

    /// Sets or clears a flag.
    pub fn set_flag(&mut self, flag: impl Into<String>, value: bool) {
        self.flags.insert(flag.into(), value);
    }

    /// Adds an item; holding it twice is a no-op.
    pub fn add_item(&mut self, item: impl Into<String>) {
        self.items.insert(item.into());
    }

    /// Adds `delta` to `resource`, never going below zero.
    pub fn modify_resource(&mut self, resource: &str, delta: i64) {
        let current = i64::from(self.resource(resource));
        let next = u32::try_from(current.saturating_add(delta).max(0)).unwrap_or(u32::MAX);
        self.resources.insert(resource.to_owned(), next);
    }

    /// Deducts every resource in `cost`.
    pub fn apply_cost(&mut self, cost: &BTreeMap<String, u32>) {
        for (name, &amount) in cost {
            self.modify_resource(name, -i64::from(amount));
        }
    }

    /// Records a checkpoint once.
    pub fn add_checkpoint(&mut self, node: NodeId) {
        if !self.checkpoints.contains(&node) {
            self.checkpoints.push(node);
        }
    }

    /// Sets the party role.
    pub fn set_role(&mut self, role: Option<String>) {
        self.role = role;
    }

    /// Points the session at the message the actor is viewing.
    pub fn set_active_surface(
        &mut self,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.active_surface = Some(MessageSurface {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            updated_at: now,
        });
    }

    /// Whether (`node`, `choice`) is locked.
    #[must_use]
    pub fn is_locked(&self, node: &NodeId, choice: &ChoiceId) -> bool {
        self.locks.get(node).is_some_and(|set| set.contains(choice))
    }

    /// Locks (`node`, `choice`); returns `true` if it was not locked before.
    pub(crate) fn lock(&mut self, node: NodeId, choice: ChoiceId) -> bool {
        self.locks.entry(node).or_default().insert(choice)
    }

    /// Drops every lock at `node`, for a fresh traversal of it.
    pub(crate) fn reset_node_locks(&mut self, node: &NodeId) -> bool {
        self.locks.remove(node).is_some()
    }

    /// The vote this actor cast at `node`, if any.
    #[must_use]
    pub fn vote(&self, node: &NodeId) -> Option<&ChoiceId> {
        self.votes.get(node)
    }

    /// Records the actor's vote; returns the prior vote if one exists, in
    /// which case nothing changes.
    pub(crate) fn set_vote(&mut self, node: NodeId, choice: ChoiceId) -> Option<ChoiceId> {
        if let Some(prior) = self.votes.get(&node) {
            return Some(prior.clone());
        }
        self.votes.insert(node, choice);
        None
    }

    pub(crate) fn clear_vote(&mut self, node: &NodeId) -> bool {
        self.votes.remove(node).is_some()
    }

    /// A timer by id.
    #[must_use]
    pub fn timer(&self, timer: &TimerId) -> Option<&TimerRecord> {
        self.timers.get(timer)
    }

    /// All active timers.
    pub fn timers(&self) -> impl Iterator<Item = &TimerRecord> {
        self.timers.values()
    }

    pub(crate) fn insert_timer(&mut self, record: TimerRecord) {
        self.timers.insert(record.timer_id.clone(), record);
    }

    pub(crate) fn remove_timer(&mut self, timer: &TimerId) -> Option<TimerRecord> {
        self.timers.remove(timer)
    }

    pub(crate) fn remove_timers_where(
        &mut self,
        mut pred: impl FnMut(&TimerRecord) -> bool,
    ) -> Vec<TimerRecord> {
        let ids: Vec<TimerId> = self
            .timers
            .values()
            .filter(|t| pred(t))
            .map(|t| t.timer_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.timers.remove(id)).collect()
    }
}
