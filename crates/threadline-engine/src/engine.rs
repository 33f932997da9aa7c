//! The engine: one entry point per host event.
//!
//! Each handler reads the actor's session (restoring it on a cache miss),
//! decides against local state only, and returns a [`RenderInstruction`].
//! Remote writes happen behind the outbox; other actors affected by an
//! event are told through the delivery channel.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use threadline_arcs::application::coordinator::{ArcCoordinator, MergeArrival};
use threadline_arcs::domain::arc::{ArcSplitState, ArcStatus};
use threadline_core::clock::SharedClock;
use threadline_core::delivery::DeliveryChannel;
use threadline_core::error::DomainError;
use threadline_core::graph::{Choice, GraphAccessor, NodeKind, Preconditions, StoryNode};
use threadline_core::group::{Group, GroupDirectory, Member};
use threadline_core::ids::{ActorId, ArcId, ChoiceId, GroupId, NodeId, StoryId, TimerId};
use threadline_core::rng::DeterministicRng;
use threadline_core::store::RemoteStore;
use threadline_session::application::ledger::ChoiceLedger;
use threadline_session::application::store::SessionStore;
use threadline_session::application::timers::{ExpiredTimer, TimerRegistry};
use threadline_session::domain::session::ActorSession;
use threadline_sync::outbox::{Outbox, OutboxWorker};
use threadline_sync::reconcile::Reconciler;
use threadline_voting::application::resolver::{QuorumVoteResolver, SubmitOutcome};
use threadline_voting::domain::poll::{Resolution, Tally, VoteScope};

use crate::config::NoQuorumPolicy;
use crate::render::{
    ArcAssignments, ArcWaitStatus, CONTINUE_CHOICE, MergeOutcome, NodeView, RenderInstruction,
};

/// Collaborators the engine is built from.
pub struct EngineDeps {
    /// Story nodes by story and node id.
    pub graph: Arc<dyn GraphAccessor>,
    /// Group membership lookups.
    pub groups: Arc<dyn GroupDirectory>,
    /// Private messages and notifications to actors.
    pub delivery: Arc<dyn DeliveryChannel>,
    /// Authoritative store behind the outbox and the lazy restores.
    pub remote: Arc<dyn RemoteStore>,
    /// Time source for timers, votes and records.
    pub clock: SharedClock,
    /// Randomness for split assignment.
    pub rng: Box<dyn DeterministicRng>,
}

/// Who votes at a timed node for a given actor.
#[derive(Debug, Clone)]
struct VoteContext {
    scope: VoteScope,
    voters: Vec<ActorId>,
    leader: Option<ActorId>,
}

/// Group traversal engine.
pub struct Engine {
    graph: Arc<dyn GraphAccessor>,
    groups: Arc<dyn GroupDirectory>,
    delivery: Arc<dyn DeliveryChannel>,
    sessions: Arc<SessionStore>,
    ledger: ChoiceLedger,
    timers: TimerRegistry,
    votes: QuorumVoteResolver,
    arcs: ArcCoordinator,
    rng: Mutex<Box<dyn DeterministicRng>>,
    restore_attempted: Mutex<HashSet<GroupId>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.sessions)
            .field("votes", &self.votes)
            .field("arcs", &self.arcs)
            .finish_non_exhaustive()
    }
}

fn destinations(node: &StoryNode) -> Vec<(ChoiceId, Option<NodeId>)> {
    node.choices
        .iter()
        .map(|c| (c.id.clone(), c.next_node_id.clone()))
        .collect()
}

/// The choice `choice_id` names at `node`, including the implicit
/// continue choice of nodes that only have a continuation.
fn effective_choice(node: &StoryNode, choice_id: &ChoiceId) -> Option<Choice> {
    if let Some(choice) = node.choice(choice_id) {
        return Some(choice.clone());
    }
    if choice_id.as_str() != CONTINUE_CHOICE || !node.choices.is_empty() {
        return None;
    }
    node.next_node_id.clone().map(|next| Choice {
        id: choice_id.clone(),
        label: "Continue".into(),
        cost: BTreeMap::new(),
        next_node_id: Some(next),
        ephemeral_confirmation: false,
    })
}

/// Why `node` cannot be entered, if it cannot.
fn unmet_precondition(
    pre: &Preconditions,
    session: &ActorSession,
    group: Option<&Group>,
    arc: Option<&ArcId>,
) -> Option<String> {
    if let Some(flag) = pre.required_flags.iter().find(|f| !session.has_flag(f)) {
        return Some(format!("requires flag {flag}"));
    }
    if let Some(item) = pre.required_items.iter().find(|i| !session.has_item(i)) {
        return Some(format!("requires item {item}"));
    }
    let players = group.map_or(1, |g| g.active_members().count());
    let players = u32::try_from(players).unwrap_or(u32::MAX);
    if let Some(min) = pre.min_player_count.filter(|&min| players < min) {
        return Some(format!("needs at least {min} players"));
    }
    if let Some(max) = pre.max_player_count.filter(|&max| players > max) {
        return Some(format!("allows at most {max} players"));
    }
    if let Some(required) = &pre.required_arc {
        if arc != Some(required) {
            return Some(format!("only for arc {required}"));
        }
    }
    if let Some(excluded) = arc.filter(|a| pre.excluded_arcs.contains(a)) {
        return Some(format!("closed to arc {excluded}"));
    }
    None
}

fn member_role(group: Option<&Group>, actor: &ActorId) -> Option<String> {
    group
        .and_then(|g| g.members.iter().find(|m| &m.actor_id == actor))
        .and_then(|m| m.role.clone())
}

fn insufficient(session: &ActorSession, choice: &Choice) -> Option<RenderInstruction> {
    session
        .shortfall(&choice.cost)
        .map(|(resource, required, available)| RenderInstruction::InsufficientResource {
            resource: resource.to_owned(),
            required,
            available,
        })
}

impl Engine {
    /// Builds an engine and the outbox worker that mirrors its state to
    /// `deps.remote`. The caller spawns the worker.
    #[must_use]
    pub fn new(deps: EngineDeps) -> (Self, OutboxWorker) {
        let (outbox, worker) = Outbox::channel(Arc::clone(&deps.remote));
        let reconciler = Reconciler::new(deps.remote);
        let sessions = Arc::new(SessionStore::new(
            outbox.clone(),
            reconciler.clone(),
            Arc::clone(&deps.clock),
        ));
        let ledger = ChoiceLedger::new(Arc::clone(&sessions));
        let timers = TimerRegistry::new(Arc::clone(&sessions));
        let votes = QuorumVoteResolver::new(Arc::clone(&sessions), timers.clone());
        let arcs = ArcCoordinator::new(outbox, reconciler, deps.clock);
        let engine = Self {
            graph: deps.graph,
            groups: deps.groups,
            delivery: deps.delivery,
            sessions,
            ledger,
            timers,
            votes,
            arcs,
            rng: Mutex::new(deps.rng),
            restore_attempted: Mutex::new(HashSet::new()),
        };
        (engine, worker)
    }

    /// Local session cache.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Choice locks over the session cache.
    #[must_use]
    pub fn ledger(&self) -> &ChoiceLedger {
        &self.ledger
    }

    /// Per-actor node timers. The sweeper runs over this registry.
    #[must_use]
    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Open polls of timed nodes.
    #[must_use]
    pub fn votes(&self) -> &QuorumVoteResolver {
        &self.votes
    }

    /// Split states by group.
    #[must_use]
    pub fn arcs(&self) -> &ArcCoordinator {
        &self.arcs
    }

    async fn session(&self, actor: &ActorId) -> Result<ActorSession, DomainError> {
        self.sessions
            .restore(actor)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("session for {actor}")))
    }

    fn node(&self, story: &StoryId, node: &NodeId) -> Result<StoryNode, DomainError> {
        self.graph
            .node(story, node)
            .ok_or_else(|| DomainError::Validation(format!("node {node} not in story {story}")))
    }

    async fn group_of(&self, actor: &ActorId) -> Result<Option<Group>, DomainError> {
        Ok(self.groups.group_of(actor).await?.filter(Group::is_active))
    }

    /// The split state of `group`. The remote store is asked until one read
    /// succeeds for the group in this process; afterwards only local state
    /// counts.
    async fn split_state(&self, group: &GroupId) -> Option<ArcSplitState> {
        if let Some(state) = self.arcs.state(group) {
            return Some(state);
        }
        let looked = self
            .restore_attempted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(group);
        if looked {
            return None;
        }
        // A failed read leaves the group unmarked so the next call asks again.
        let state = self.arcs.restore(group).await.ok()?;
        self.restore_attempted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.clone());
        state
    }

    async fn arc_of(&self, actor: &ActorId, group: Option<&Group>) -> Option<ArcId> {
        let state = self.split_state(&group?.id).await?;
        state.arc_of(actor).map(|a| a.arc_id.clone())
    }

    /// Solo arcs and lone actors never vote. Inside a split the arc votes;
    /// otherwise the whole active group does.
    async fn vote_context(&self, actor: &ActorId, group: Option<&Group>) -> Option<VoteContext> {
        let group = group?;
        if let Some(state) = self.split_state(&group.id).await {
            if let Some(arc) = state.arc_of(actor) {
                if arc.is_solo() {
                    return None;
                }
                return Some(VoteContext {
                    scope: VoteScope::Arc {
                        group_id: group.id.clone(),
                        arc_id: arc.arc_id.clone(),
                    },
                    voters: arc.members.clone(),
                    leader: Some(group.leader_id.clone()),
                });
            }
        }
        let voters = group.active_actor_ids();
        if voters.len() < 2 {
            return None;
        }
        Some(VoteContext {
            scope: VoteScope::Group {
                group_id: group.id.clone(),
            },
            voters,
            leader: Some(group.leader_id.clone()),
        })
    }

    async fn notify(&self, actor: &ActorId, instruction: &RenderInstruction) {
        let payload = match serde_json::to_string(instruction) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(recipient = %actor, error = %e, "notification not serializable");
                return;
            }
        };
        if let Err(e) = self.delivery.deliver(actor, &payload).await {
            tracing::warn!(recipient = %actor, error = %e, "delivery failed");
        }
    }

    /// Starts `actor` on `story` at `entry` and enters that node.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `entry` is not in `story`.
    pub async fn start_story(
        &self,
        actor: &ActorId,
        story: &StoryId,
        entry: &NodeId,
    ) -> Result<RenderInstruction, DomainError> {
        self.node(story, entry)?;
        let group = self.group_of(actor).await?;
        self.sessions
            .start(actor.clone(), story.clone(), entry.clone());
        if let Some(role) = member_role(group.as_ref(), actor) {
            self.sessions.update(actor, |s| s.set_role(Some(role)))?;
        }
        self.enter_node(actor, entry).await
    }

    /// Ends the session of `actor`.
    pub fn end_story(&self, actor: &ActorId) -> bool {
        self.sessions.end(actor).is_some()
    }

    /// Remembers which message the actor is looking at.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub async fn set_active_surface(
        &self,
        actor: &ActorId,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), DomainError> {
        self.session(actor).await?;
        let now = self.sessions.clock().now();
        self.sessions
            .update(actor, |s| s.set_active_surface(channel_id, message_id, now))
    }

    /// Handles `actor` picking `choice_id` at `node_id`.
    ///
    /// # Errors
    ///
    /// * `DomainError::NotFound` if the actor has no session, locally or remotely.
    /// * `DomainError::Validation` if the actor is elsewhere or the choice
    ///   is not offered.
    pub async fn on_choice_submitted(
        &self,
        actor: &ActorId,
        node_id: &NodeId,
        choice_id: &ChoiceId,
    ) -> Result<RenderInstruction, DomainError> {
        let session = self.session(actor).await?;
        if session.current_node_id() != node_id {
            return Err(DomainError::Validation(format!(
                "{actor} is at {}, not {node_id}",
                session.current_node_id()
            )));
        }
        let node = self.node(session.story_id(), node_id)?;
        let choice = effective_choice(&node, choice_id).ok_or_else(|| {
            DomainError::Validation(format!("choice {choice_id} is not offered at {node_id}"))
        })?;
        let group = self.group_of(actor).await?;

        if node.kind == NodeKind::ArcMerge {
            if let Some(g) = &group {
                if let Some(state) = self.split_state(&g.id).await {
                    let pending = state.pending_arcs();
                    return Ok(RenderInstruction::WaitingAtMerge {
                        merge_node_id: state.merge_node_id,
                        pending,
                    });
                }
            }
        }

        let context = self.vote_context(actor, group.as_ref()).await;

        if node.kind == NodeKind::Timed {
            if let Some(context) = context {
                return self
                    .submit_vote(actor, &session, &node, &choice, &context)
                    .await;
            }
        }

        if let Some(instruction) = insufficient(&session, &choice) {
            return Ok(instruction);
        }

        if let Some(next) = &choice.next_node_id {
            let next_node = self.node(session.story_id(), next)?;
            let arc = self.arc_of(actor, group.as_ref()).await;
            if let Some(reason) =
                unmet_precondition(&next_node.preconditions, &session, group.as_ref(), arc.as_ref())
            {
                return Ok(RenderInstruction::Blocked {
                    node_id: next.clone(),
                    reason,
                });
            }
        }

        if !self.ledger.try_lock(actor, node_id, choice_id)? {
            return Ok(RenderInstruction::AlreadyChosen {
                node_id: node_id.clone(),
                choice_id: choice_id.clone(),
            });
        }
        if node.kind == NodeKind::Timed {
            self.timers.clear(actor, &TimerId::for_node(node_id));
        }
        self.sessions.update(actor, |s| {
            s.apply_cost(&choice.cost);
            s.record_choice(choice.id.clone(), choice.next_node_id.clone());
        })?;
        tracing::info!(actor = %actor, node = %node_id, choice = %choice_id, "choice resolved");

        match &choice.next_node_id {
            Some(next) => self.enter_node(actor, next).await,
            None => Ok(RenderInstruction::StoryComplete {
                story_id: session.story_id().clone(),
            }),
        }
    }

    /// Casts the actor's ballot. A repeated ballot is answered before the
    /// cost is checked, so it never looks unaffordable.
    async fn submit_vote(
        &self,
        actor: &ActorId,
        session: &ActorSession,
        node: &StoryNode,
        choice: &Choice,
        context: &VoteContext,
    ) -> Result<RenderInstruction, DomainError> {
        if let Some(prior) = self.votes.ballot_of(&context.scope, &node.id, actor) {
            return Ok(RenderInstruction::AlreadyVoted {
                node_id: node.id.clone(),
                prior,
            });
        }
        if let Some(instruction) = insufficient(session, choice) {
            return Ok(instruction);
        }
        let stalled = session.choices().last() == Some(&ChoiceId::timeout(&node.id));
        if !stalled && !self.votes.is_open(&context.scope, &node.id) {
            self.resume_vote(node, context).await?;
        }
        let outcome = match self.votes.submit(&context.scope, &node.id, actor, &choice.id) {
            Ok(outcome) => outcome,
            Err(DomainError::NotFound(_)) => {
                return Ok(RenderInstruction::VotingClosed {
                    node_id: node.id.clone(),
                });
            }
            Err(e) => return Err(e),
        };
        match outcome {
            SubmitOutcome::Recorded(tally) => {
                self.commit_ballot(actor, node, choice)?;
                Ok(RenderInstruction::VoteRecorded {
                    node_id: node.id.clone(),
                    choice_id: choice.id.clone(),
                    tally,
                })
            }
            SubmitOutcome::Duplicate { prior } => Ok(RenderInstruction::AlreadyVoted {
                node_id: node.id.clone(),
                prior,
            }),
            SubmitOutcome::Closed => Ok(RenderInstruction::VotingClosed {
                node_id: node.id.clone(),
            }),
            SubmitOutcome::Resolved(resolution) => {
                self.commit_ballot(actor, node, choice)?;
                let mut mine = None;
                for (voter, view) in self.route_voters(&resolution).await {
                    if &voter == actor {
                        mine = Some(view);
                    } else {
                        self.report_routed(&voter, view).await;
                    }
                }
                mine.unwrap_or_else(|| {
                    Err(DomainError::NotFound(format!("{actor} among voters at {}", node.id)))
                })
            }
        }
    }

    fn commit_ballot(
        &self,
        actor: &ActorId,
        node: &StoryNode,
        choice: &Choice,
    ) -> Result<(), DomainError> {
        self.ledger.lock(actor, &node.id, &choice.id)?;
        if !choice.cost.is_empty() {
            self.sessions.update(actor, |s| s.apply_cost(&choice.cost))?;
        }
        Ok(())
    }

    /// Reopens the poll at `node` when it is missing while its voters still
    /// stand there, as after a restart. Voters at the node without a running
    /// timer get a fresh one.
    async fn resume_vote(&self, node: &StoryNode, context: &VoteContext) -> Result<(), DomainError> {
        let spec = node.timer.ok_or_else(|| {
            DomainError::Validation(format!("timed node {} has no timer", node.id))
        })?;
        let timer_id = TimerId::for_node(&node.id);
        for voter in &context.voters {
            let at_node = self
                .session(voter)
                .await
                .is_ok_and(|s| s.current_node_id() == &node.id);
            if at_node && self.timers.get(voter, &timer_id).is_none() {
                self.timers
                    .start(voter, timer_id.clone(), node.id.clone(), spec.duration_seconds)?;
            }
        }
        let opened = self.votes.open(
            context.scope.clone(),
            node.id.clone(),
            context.voters.clone(),
            context.leader.clone(),
            destinations(node),
        )?;
        if opened {
            tracing::info!(scope = %context.scope, node = %node.id, "vote resumed");
        }
        Ok(())
    }

    /// Moves every voter to the winning destination and enters it for them.
    async fn route_voters(
        &self,
        resolution: &Resolution,
    ) -> Vec<(ActorId, Result<RenderInstruction, DomainError>)> {
        let mut views = Vec::with_capacity(resolution.voters.len());
        for voter in &resolution.voters {
            let view = self.route_voter(voter, resolution).await;
            views.push((voter.clone(), view));
        }
        views
    }

    async fn route_voter(
        &self,
        voter: &ActorId,
        resolution: &Resolution,
    ) -> Result<RenderInstruction, DomainError> {
        let story = self.sessions.update(voter, |s| {
            s.record_choice(
                resolution.choice_id.clone(),
                resolution.next_node_id.clone(),
            );
            s.story_id().clone()
        })?;
        let then = match &resolution.next_node_id {
            Some(next) => self.enter_node(voter, next).await?,
            None => RenderInstruction::StoryComplete { story_id: story },
        };
        Ok(RenderInstruction::VoteResolved {
            node_id: resolution.node_id.clone(),
            choice_id: resolution.choice_id.clone(),
            tally: resolution.tally.clone(),
            then: Box::new(then),
        })
    }

    async fn report_routed(&self, voter: &ActorId, view: Result<RenderInstruction, DomainError>) {
        match view {
            Ok(instruction) => self.notify(voter, &instruction).await,
            Err(e) => tracing::warn!(actor = %voter, error = %e, "voter not routed after vote"),
        }
    }

    /// Moves `actor` onto `node_id` and performs the node's entry effects.
    ///
    /// # Errors
    ///
    /// * `DomainError::NotFound` if the actor has no session.
    /// * `DomainError::Validation` for a node missing from the story or a
    ///   malformed timed or split node.
    pub async fn enter_node(
        &self,
        actor: &ActorId,
        node_id: &NodeId,
    ) -> Result<RenderInstruction, DomainError> {
        let session = self.session(actor).await?;
        let node = self.node(session.story_id(), node_id)?;
        let group = self.group_of(actor).await?;
        let arc = self.arc_of(actor, group.as_ref()).await;

        if let Some(reason) =
            unmet_precondition(&node.preconditions, &session, group.as_ref(), arc.as_ref())
        {
            tracing::debug!(actor = %actor, node = %node_id, reason, "node blocked");
            return Ok(RenderInstruction::Blocked {
                node_id: node_id.clone(),
                reason,
            });
        }

        self.apply_entry_effects(actor, &node, group.as_ref(), arc.as_ref())
            .await?;

        match node.kind {
            NodeKind::Narrative | NodeKind::Choice => {
                Ok(RenderInstruction::ShowNode(NodeView::of(&node, None)))
            }
            NodeKind::Timed => self.enter_timed(actor, &node, group.as_ref()).await,
            NodeKind::ArcSplit => self
                .on_arc_split_entered(actor, node_id)
                .await
                .map(RenderInstruction::ArcAssignments),
            NodeKind::ArcMerge => Ok(match self.on_arc_merge_entered(actor, node_id).await? {
                MergeOutcome::Waiting { pending } => RenderInstruction::WaitingAtMerge {
                    merge_node_id: node_id.clone(),
                    pending,
                },
                MergeOutcome::Merged {
                    merge_node_id,
                    next_node_id,
                } => RenderInstruction::Merged {
                    merge_node_id,
                    next_node_id,
                    node: NodeView::of(&node, None),
                },
                MergeOutcome::NotInSplit => {
                    RenderInstruction::ShowNode(NodeView::of(&node, None))
                }
            }),
        }
    }

    /// Moves `actor` onto `node` and records what entering it implies:
    /// checkpoint, fresh locks, arc position and private messages.
    async fn apply_entry_effects(
        &self,
        actor: &ActorId,
        node: &StoryNode,
        group: Option<&Group>,
        arc: Option<&ArcId>,
    ) -> Result<(), DomainError> {
        let role = self.sessions.update(actor, |s| {
            s.set_current_node(node.id.clone());
            if node.checkpoint {
                s.add_checkpoint(node.id.clone());
            }
            s.role().map(str::to_owned)
        })?;
        self.ledger.reset_node(actor, &node.id);
        if let Some(g) = group {
            self.arcs.update_arc_node(&g.id, actor, &node.id);
        }
        let role = role.or_else(|| member_role(group, actor));
        self.deliver_dms(actor, node, role.as_deref(), arc).await;
        Ok(())
    }

    /// Sends the node's private messages meant for the entering actor.
    async fn deliver_dms(
        &self,
        actor: &ActorId,
        node: &StoryNode,
        role: Option<&str>,
        arc: Option<&ArcId>,
    ) {
        if node.arc_context.as_ref().is_some_and(|ctx| Some(ctx) != arc) {
            return;
        }
        for dm in &node.dm_deliveries {
            if role != Some(dm.recipient_role.as_str()) {
                continue;
            }
            if let Err(e) = self.delivery.deliver(actor, &dm.text).await {
                tracing::warn!(recipient = %actor, node = %node.id, error = %e, "delivery failed");
            }
        }
    }

    async fn enter_timed(
        &self,
        actor: &ActorId,
        node: &StoryNode,
        group: Option<&Group>,
    ) -> Result<RenderInstruction, DomainError> {
        let spec = node.timer.ok_or_else(|| {
            DomainError::Validation(format!("timed node {} has no timer", node.id))
        })?;
        self.timers.start(
            actor,
            TimerId::for_node(&node.id),
            node.id.clone(),
            spec.duration_seconds,
        )?;
        if let Some(context) = self.vote_context(actor, group).await {
            self.votes.open(
                context.scope,
                node.id.clone(),
                context.voters,
                context.leader,
                destinations(node),
            )?;
        }
        Ok(RenderInstruction::ShowNode(NodeView::of(
            node,
            Some(spec.duration_seconds),
        )))
    }

    /// Splits the actor's group at `node_id`, or returns the existing split
    /// when another member got there first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the node is not an arc split, the
    /// actor has no active group, the split config is malformed, or its merge
    /// or entry nodes are missing from the story.
    pub async fn on_arc_split_entered(
        &self,
        actor: &ActorId,
        node_id: &NodeId,
    ) -> Result<ArcAssignments, DomainError> {
        let session = self.session(actor).await?;
        let node = self.node(session.story_id(), node_id)?;
        let config = node
            .arc_split
            .as_ref()
            .filter(|_| node.kind == NodeKind::ArcSplit)
            .ok_or_else(|| DomainError::Validation(format!("{node_id} is not an arc split")))?;
        self.node(session.story_id(), &config.merge_node_id)?;
        for arc in &config.arcs {
            self.node(session.story_id(), &arc.entry_node_id)?;
        }
        let group = self.group_of(actor).await?.ok_or_else(|| {
            DomainError::Validation(format!("{actor} needs an active group to split"))
        })?;
        self.split_state(&group.id).await;

        let members: Vec<Member> = group.active_members().cloned().collect();
        let state = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.arcs
                .split(&group.id, node_id, config, &members, &mut **rng)?
        };
        Ok(ArcAssignments::of(&state, actor))
    }

    /// Sends `actor` to the entry node of their arc.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the actor is not in a split.
    pub async fn continue_into_arc(
        &self,
        actor: &ActorId,
    ) -> Result<RenderInstruction, DomainError> {
        let group = self
            .group_of(actor)
            .await?
            .ok_or_else(|| DomainError::Validation(format!("{actor} is not in a group")))?;
        let entry = self
            .split_state(&group.id)
            .await
            .and_then(|s| s.arc_of(actor).map(|a| a.entry_node_id.clone()))
            .ok_or_else(|| DomainError::Validation(format!("{actor} is not in an arc")))?;
        self.enter_node(actor, &entry).await
    }

    /// Records that `actor` reached the merge node. The arrival that
    /// completes the barrier moves every member to the merge node and tells
    /// the others. Members not standing on the merge node yet get its entry
    /// effects as if they had walked in.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `node_id` is not the merge node
    /// of the group's split.
    pub async fn on_arc_merge_entered(
        &self,
        actor: &ActorId,
        node_id: &NodeId,
    ) -> Result<MergeOutcome, DomainError> {
        let Some(group) = self.group_of(actor).await? else {
            return Ok(MergeOutcome::NotInSplit);
        };
        let Some(state) = self.split_state(&group.id).await else {
            return Ok(MergeOutcome::NotInSplit);
        };
        if &state.merge_node_id != node_id {
            return Err(DomainError::Validation(format!(
                "{node_id} is not the merge node {} of the current split",
                state.merge_node_id
            )));
        }

        match self.arcs.arrive_at_merge(&group.id, actor) {
            MergeArrival::NotInSplit => Ok(MergeOutcome::NotInSplit),
            MergeArrival::Waiting { pending } => Ok(MergeOutcome::Waiting { pending }),
            MergeArrival::Merged {
                merge_node_id,
                members,
            } => {
                let session = self.session(actor).await?;
                let node = self.node(session.story_id(), &merge_node_id)?;
                for member in &members {
                    let arrived = match self.session(member).await {
                        Ok(s) => s.current_node_id() == &merge_node_id,
                        Err(e) => {
                            tracing::warn!(actor = %member, error = %e, "member not moved to merge node");
                            continue;
                        }
                    };
                    if !arrived {
                        let moved = self
                            .apply_entry_effects(member, &node, Some(&group), None)
                            .await;
                        if let Err(e) = moved {
                            tracing::warn!(actor = %member, error = %e, "member not moved to merge node");
                            continue;
                        }
                    }
                    if member != actor {
                        let view = RenderInstruction::Merged {
                            merge_node_id: merge_node_id.clone(),
                            next_node_id: node.next_node_id.clone(),
                            node: NodeView::of(&node, None),
                        };
                        self.notify(member, &view).await;
                    }
                }
                Ok(MergeOutcome::Merged {
                    merge_node_id,
                    next_node_id: node.next_node_id,
                })
            }
        }
    }

    /// Deadline handling for an expired timer.
    ///
    /// A voting node is resolved with the ballots present; a vote that was
    /// already resolved is left alone. An empty vote falls back to `policy`.
    /// Timers outside a vote stall the actor with the synthetic timeout choice.
    ///
    /// # Errors
    ///
    /// Returns the first error that prevented the fallback from being applied.
    pub async fn on_timer_expired(
        &self,
        expired: &ExpiredTimer,
        policy: NoQuorumPolicy,
        reopen_seconds: u32,
    ) -> Result<(), DomainError> {
        let actor = &expired.actor_id;
        let node_id = &expired.node_id;
        if self.timers.get(actor, &expired.timer_id).is_some() {
            tracing::debug!(actor = %actor, node = %node_id, "stale expiry; timer was restarted");
            return Ok(());
        }
        let Some(scope) = self.votes.scope_of(actor, node_id) else {
            self.stall(actor, node_id).await;
            return Ok(());
        };
        let voters = self.votes.voters(&scope, node_id).unwrap_or_default();

        match self.votes.resolve_on_timeout(&scope, node_id) {
            Ok(resolution) => {
                for (voter, view) in self.route_voters(&resolution).await {
                    self.report_routed(&voter, view).await;
                }
                Ok(())
            }
            Err(DomainError::NotFound(_)) => Ok(()),
            Err(DomainError::NoQuorum { node_id }) => match policy {
                NoQuorumPolicy::Stall => {
                    for voter in &voters {
                        self.stall(voter, &node_id).await;
                    }
                    Ok(())
                }
                NoQuorumPolicy::Reopen => {
                    self.reopen(actor, scope, &node_id, voters, reopen_seconds)
                        .await
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Records the timeout choice for an actor still at `node_id`, once.
    async fn stall(&self, actor: &ActorId, node_id: &NodeId) {
        let at_node = self
            .sessions
            .get(actor)
            .is_some_and(|s| s.current_node_id() == node_id);
        if !at_node {
            return;
        }
        let timeout = ChoiceId::timeout(node_id);
        match self.ledger.try_lock(actor, node_id, &timeout) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(actor = %actor, node = %node_id, error = %e, "stall not recorded");
                return;
            }
        }
        if let Err(e) = self.sessions.update(actor, |s| s.record_choice(timeout, None)) {
            tracing::warn!(actor = %actor, node = %node_id, error = %e, "stall not recorded");
            return;
        }
        tracing::info!(actor = %actor, node = %node_id, "timer expired; actor stalled");
        self.notify(
            actor,
            &RenderInstruction::NoQuorum {
                node_id: node_id.clone(),
                reopened: false,
            },
        )
        .await;
    }

    async fn reopen(
        &self,
        actor: &ActorId,
        scope: VoteScope,
        node_id: &NodeId,
        voters: Vec<ActorId>,
        seconds: u32,
    ) -> Result<(), DomainError> {
        let session = self.session(actor).await?;
        let node = self.node(session.story_id(), node_id)?;
        let leader = self.group_of(actor).await?.map(|g| g.leader_id);
        self.votes.open(
            scope,
            node_id.clone(),
            voters.clone(),
            leader,
            destinations(&node),
        )?;
        for voter in &voters {
            let at_node = self
                .sessions
                .get(voter)
                .is_some_and(|s| s.current_node_id() == node_id);
            if !at_node {
                continue;
            }
            self.timers
                .start(voter, TimerId::for_node(node_id), node_id.clone(), seconds)?;
            self.notify(
                voter,
                &RenderInstruction::NoQuorum {
                    node_id: node_id.clone(),
                    reopened: true,
                },
            )
            .await;
        }
        tracing::info!(node = %node_id, seconds, "empty vote reopened");
        Ok(())
    }

    /// Counts of the vote `actor` takes part in at `node`.
    #[must_use]
    pub fn vote_tally(&self, actor: &ActorId, node: &NodeId) -> Option<Tally> {
        let scope = self.votes.scope_of(actor, node)?;
        self.votes.tally(&scope, node)
    }

    /// Which arcs of `group` have reached the merge node.
    #[must_use]
    pub fn arc_wait_status(&self, group: &GroupId) -> Option<ArcWaitStatus> {
        let state = self.arcs.state(group)?;
        Some(ArcWaitStatus {
            arrived: state
                .arcs
                .iter()
                .filter(|a| a.status != ArcStatus::Active)
                .map(|a| a.arc_id.clone())
                .collect(),
            pending: state.pending_arcs(),
            merge_node_id: state.merge_node_id,
        })
    }

    /// Whole seconds `actor` has left at the timed `node`.
    #[must_use]
    pub fn timer_remaining(&self, actor: &ActorId, node: &NodeId) -> u32 {
        self.timers
            .remaining_seconds(actor, &TimerId::for_node(node))
    }
}
