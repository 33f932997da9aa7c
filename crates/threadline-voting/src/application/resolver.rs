//! Quorum vote resolver.
//!
//! Every state change of a poll happens inside one critical section: a
//! ballot is inserted and the quorum is re-checked under the same guard, so
//! the last concurrent ballot resolves the poll exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, NodeId, TimerId};
use threadline_session::application::store::SessionStore;
use threadline_session::application::timers::TimerRegistry;

use crate::domain::poll::{Poll, Resolution, ResolutionTrigger, Tally, VoteRecord, VoteScope, decide};

/// Polls with fewer expected voters than this only close at the deadline.
pub const MIN_EARLY_RESOLUTION_VOTERS: usize = 3;

/// Result of a ballot submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The ballot was counted; the poll stays open.
    Recorded(Tally),
    /// The actor already voted; the first ballot stands.
    Duplicate {
        /// The ballot already counted.
        prior: ChoiceId,
    },
    /// The actor's deadline has passed.
    Closed,
    /// The ballot completed the quorum and decided the poll.
    Resolved(Resolution),
}

type PollKey = (VoteScope, NodeId);

/// Holds every open poll.
pub struct QuorumVoteResolver {
    polls: Mutex<HashMap<PollKey, Poll>>,
    sessions: Arc<SessionStore>,
    timers: TimerRegistry,
}

impl std::fmt::Debug for QuorumVoteResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumVoteResolver")
            .field("open_polls", &self.polls().len())
            .finish_non_exhaustive()
    }
}

impl QuorumVoteResolver {
    /// Creates a resolver that records ballots on `sessions` and reads
    /// deadlines from `timers`.
    #[must_use]
    pub fn new(sessions: Arc<SessionStore>, timers: TimerRegistry) -> Self {
        Self {
            polls: Mutex::new(HashMap::new()),
            sessions,
            timers,
        }
    }

    fn polls(&self) -> MutexGuard<'_, HashMap<PollKey, Poll>> {
        self.polls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a poll at `node` for `voters`. Opening a poll that is already
    /// open changes nothing and returns `false`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` when there are no voters or no options.
    pub fn open(
        &self,
        scope: VoteScope,
        node: NodeId,
        voters: Vec<ActorId>,
        leader: Option<ActorId>,
        destinations: Vec<(ChoiceId, Option<NodeId>)>,
    ) -> Result<bool, DomainError> {
        if voters.is_empty() {
            return Err(DomainError::Validation(format!("vote at {node} has no voters")));
        }
        if destinations.is_empty() {
            return Err(DomainError::Validation(format!("vote at {node} has no choices")));
        }
        let mut polls = self.polls();
        let key = (scope, node);
        if polls.contains_key(&key) {
            return Ok(false);
        }
        tracing::info!(scope = %key.0, node = %key.1, voters = voters.len(), "vote opened");
        let poll = Poll {
            scope: key.0.clone(),
            node_id: key.1.clone(),
            voters,
            leader,
            destinations,
            ballots: Vec::new(),
            opened_at: self.sessions.clock().now(),
        };
        polls.insert(key, poll);
        Ok(true)
    }

    /// Whether a poll is open at `node` for `scope`.
    #[must_use]
    pub fn is_open(&self, scope: &VoteScope, node: &NodeId) -> bool {
        self.polls().contains_key(&(scope.clone(), node.clone()))
    }

    /// The scope of the open poll at `node` that expects `actor`.
    #[must_use]
    pub fn scope_of(&self, actor: &ActorId, node: &NodeId) -> Option<VoteScope> {
        self.polls()
            .values()
            .find(|p| &p.node_id == node && p.expects(actor))
            .map(|p| p.scope.clone())
    }

    /// Expected voters of an open poll.
    #[must_use]
    pub fn voters(&self, scope: &VoteScope, node: &NodeId) -> Option<Vec<ActorId>> {
        self.polls()
            .get(&(scope.clone(), node.clone()))
            .map(|p| p.voters.clone())
    }

    /// Current counts of an open poll.
    #[must_use]
    pub fn tally(&self, scope: &VoteScope, node: &NodeId) -> Option<Tally> {
        self.polls()
            .get(&(scope.clone(), node.clone()))
            .map(Poll::tally)
    }

    /// The ballot `actor` already cast in the open poll, if any.
    #[must_use]
    pub fn ballot_of(&self, scope: &VoteScope, node: &NodeId, actor: &ActorId) -> Option<ChoiceId> {
        self.polls()
            .get(&(scope.clone(), node.clone()))
            .and_then(|p| p.ballot_of(actor))
            .map(|b| b.choice_id.clone())
    }

    /// Submits `actor`'s ballot.
    ///
    /// # Errors
    ///
    /// * `DomainError::NotFound` if no poll is open at `node` for `scope`.
    /// * `DomainError::Validation` if `actor` is not an expected voter or
    ///   `choice` is not offered.
    pub fn submit(
        &self,
        scope: &VoteScope,
        node: &NodeId,
        actor: &ActorId,
        choice: &ChoiceId,
    ) -> Result<SubmitOutcome, DomainError> {
        let mut polls = self.polls();
        let key = (scope.clone(), node.clone());
        let poll = polls
            .get_mut(&key)
            .ok_or_else(|| DomainError::NotFound(format!("open vote at {node} for {scope}")))?;

        if !poll.expects(actor) {
            return Err(DomainError::Validation(format!(
                "{actor} is not a voter at {node}"
            )));
        }
        if !poll.offers(choice) {
            return Err(DomainError::Validation(format!(
                "choice {choice} is not offered at {node}"
            )));
        }
        if let Some(prior) = poll.ballot_of(actor) {
            return Ok(SubmitOutcome::Duplicate {
                prior: prior.choice_id.clone(),
            });
        }
        if self.timers.is_expired(actor, &TimerId::for_node(node)) {
            return Ok(SubmitOutcome::Closed);
        }

        poll.ballots.push(VoteRecord {
            actor_id: actor.clone(),
            choice_id: choice.clone(),
            cast_at: self.sessions.clock().now(),
        });
        if let Err(e) = self.sessions.record_vote(actor, node, choice) {
            tracing::warn!(actor = %actor, node = %node, error = %e, "vote not mirrored to session");
        }
        tracing::debug!(actor = %actor, node = %node, choice = %choice, "vote recorded");

        let quorum = poll.voters.len() >= MIN_EARLY_RESOLUTION_VOTERS && poll.is_complete();
        let tally = poll.tally();
        if quorum {
            if let Some(poll) = polls.remove(&key) {
                return self
                    .finish(poll, ResolutionTrigger::Quorum)
                    .map(SubmitOutcome::Resolved);
            }
        }
        Ok(SubmitOutcome::Recorded(tally))
    }

    /// Closes the poll at its deadline with whatever ballots are present.
    ///
    /// # Errors
    ///
    /// * `DomainError::NotFound` if the poll was already resolved; callers
    ///   treat this as a no-op.
    /// * `DomainError::NoQuorum` if nobody voted. The poll is closed either way.
    pub fn resolve_on_timeout(
        &self,
        scope: &VoteScope,
        node: &NodeId,
    ) -> Result<Resolution, DomainError> {
        let poll = self
            .polls()
            .remove(&(scope.clone(), node.clone()))
            .ok_or_else(|| DomainError::NotFound(format!("open vote at {node} for {scope}")))?;
        self.finish(poll, ResolutionTrigger::Deadline)
    }

    fn finish(&self, poll: Poll, trigger: ResolutionTrigger) -> Result<Resolution, DomainError> {
        for voter in &poll.voters {
            self.timers.clear(voter, &TimerId::for_node(&poll.node_id));
            self.sessions.clear_vote(voter, &poll.node_id);
        }
        let Some(choice_id) = decide(&poll.ballots, poll.leader.as_ref()) else {
            tracing::info!(scope = %poll.scope, node = %poll.node_id, "vote closed without ballots");
            return Err(DomainError::NoQuorum {
                node_id: poll.node_id,
            });
        };
        tracing::info!(
            scope = %poll.scope,
            node = %poll.node_id,
            choice = %choice_id,
            ?trigger,
            "vote resolved"
        );
        Ok(Resolution {
            next_node_id: poll.destination(&choice_id),
            tally: poll.tally(),
            scope: poll.scope,
            node_id: poll.node_id,
            choice_id,
            trigger,
            voters: poll.voters,
        })
    }
}
