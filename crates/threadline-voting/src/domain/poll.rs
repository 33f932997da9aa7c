//! Polls, ballots and the plurality rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threadline_core::ids::{ActorId, ArcId, ChoiceId, GroupId, NodeId};

/// Who votes on a timed node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoteScope {
    /// The active members of a group that is not split.
    Group {
        /// The voting group.
        group_id: GroupId,
    },
    /// The members of one arc of a split group.
    Arc {
        /// The split group.
        group_id: GroupId,
        /// The voting arc.
        arc_id: ArcId,
    },
}

impl std::fmt::Display for VoteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group { group_id } => write!(f, "group:{group_id}"),
            Self::Arc { group_id, arc_id } => write!(f, "arc:{group_id}/{arc_id}"),
        }
    }
}

/// One ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Voter.
    pub actor_id: ActorId,
    /// Chosen option.
    pub choice_id: ChoiceId,
    /// Arrival time.
    pub cast_at: DateTime<Utc>,
}

/// Votes for one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    /// The option.
    pub choice_id: ChoiceId,
    /// Ballots cast for it.
    pub votes: u32,
}

/// Read-only view of a poll's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Counts per option, in order of each option's first ballot.
    pub entries: Vec<TallyEntry>,
    /// Ballots cast so far.
    pub voted: usize,
    /// Voters expected.
    pub expected: usize,
}

/// How a poll was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTrigger {
    /// Every expected voter answered before the deadline.
    Quorum,
    /// The deadline passed.
    Deadline,
}

/// The single outcome of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Scope that voted.
    pub scope: VoteScope,
    /// Timed node that was decided.
    pub node_id: NodeId,
    /// Winning option.
    pub choice_id: ChoiceId,
    /// Where the winning option leads, if anywhere.
    pub next_node_id: Option<NodeId>,
    /// Final counts.
    pub tally: Tally,
    /// Early or at the deadline.
    pub trigger: ResolutionTrigger,
    /// Everyone the outcome applies to.
    pub voters: Vec<ActorId>,
}

/// An open vote at one timed node.
#[derive(Debug, Clone)]
pub struct Poll {
    pub(crate) scope: VoteScope,
    pub(crate) node_id: NodeId,
    pub(crate) voters: Vec<ActorId>,
    pub(crate) leader: Option<ActorId>,
    pub(crate) destinations: Vec<(ChoiceId, Option<NodeId>)>,
    pub(crate) ballots: Vec<VoteRecord>,
    pub(crate) opened_at: DateTime<Utc>,
}

impl Poll {
    /// Expected voters, in membership order.
    #[must_use]
    pub fn voters(&self) -> &[ActorId] {
        &self.voters
    }

    /// When the poll was opened.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub(crate) fn expects(&self, actor: &ActorId) -> bool {
        self.voters.contains(actor)
    }

    pub(crate) fn offers(&self, choice: &ChoiceId) -> bool {
        self.destinations.iter().any(|(c, _)| c == choice)
    }

    pub(crate) fn ballot_of(&self, actor: &ActorId) -> Option<&VoteRecord> {
        self.ballots.iter().find(|b| &b.actor_id == actor)
    }

    pub(crate) fn destination(&self, choice: &ChoiceId) -> Option<NodeId> {
        self.destinations
            .iter()
            .find(|(c, _)| c == choice)
            .and_then(|(_, next)| next.clone())
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.ballots.len() >= self.voters.len()
    }

    /// Current counts.
    #[must_use]
    pub fn tally(&self) -> Tally {
        Tally {
            entries: tally(&self.ballots),
            voted: self.ballots.len(),
            expected: self.voters.len(),
        }
    }
}

/// Counts ballots per option, keeping options in order of first arrival.
#[must_use]
pub fn tally(ballots: &[VoteRecord]) -> Vec<TallyEntry> {
    let mut entries: Vec<TallyEntry> = Vec::new();
    for ballot in ballots {
        match entries.iter_mut().find(|e| e.choice_id == ballot.choice_id) {
            Some(entry) => entry.votes += 1,
            None => entries.push(TallyEntry {
                choice_id: ballot.choice_id.clone(),
                votes: 1,
            }),
        }
    }
    entries
}

/// Strict plurality. Ties go to the leader's option when the leader voted
/// for one of the tied options, otherwise to the tied option whose first
/// ballot arrived earliest. `None` when there are no ballots.
#[must_use]
pub fn decide(ballots: &[VoteRecord], leader: Option<&ActorId>) -> Option<ChoiceId> {
    let entries = tally(ballots);
    let top = entries.iter().map(|e| e.votes).max()?;
    let tied: Vec<&ChoiceId> = entries
        .iter()
        .filter(|e| e.votes == top)
        .map(|e| &e.choice_id)
        .collect();

    let leader_pick = leader
        .and_then(|l| ballots.iter().find(|b| &b.actor_id == l))
        .map(|b| &b.choice_id)
        .filter(|choice| tied.contains(choice));

    leader_pick.or_else(|| tied.first().copied()).cloned()
}
