//! Render instructions handed back to the host.
//!
//! The engine never draws anything. Every event returns one of these values
//! and the host decides how to present it.

use serde::{Deserialize, Serialize};
use threadline_arcs::domain::arc::ArcSplitState;
use threadline_core::graph::{NodeKind, StoryNode};
use threadline_core::ids::{ActorId, ArcId, ChoiceId, NodeId, StoryId};
use threadline_voting::domain::poll::Tally;

/// A choice as shown to the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceView {
    pub id: ChoiceId,
    pub label: String,
}

/// A node as shown to the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub title: Option<String>,
    pub body: Option<String>,
    pub choices: Vec<ChoiceView>,
    /// Seconds left to answer, for timed nodes.
    pub remaining_seconds: Option<u32>,
}

/// Choice offered by nodes that have no choices but a continuation.
pub const CONTINUE_CHOICE: &str = "continue";

impl NodeView {
    #[must_use]
    pub fn of(node: &StoryNode, remaining_seconds: Option<u32>) -> Self {
        let mut choices: Vec<ChoiceView> = node
            .choices
            .iter()
            .map(|c| ChoiceView {
                id: c.id.clone(),
                label: c.label.clone(),
            })
            .collect();
        if choices.is_empty() && node.next_node_id.is_some() {
            choices.push(ChoiceView {
                id: ChoiceId::new(CONTINUE_CHOICE),
                label: "Continue".into(),
            });
        }
        Self {
            node_id: node.id.clone(),
            kind: node.kind,
            title: node.title.clone(),
            body: node.body.clone(),
            choices,
            remaining_seconds,
        }
    }
}

/// Progress of a split toward its merge node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcWaitStatus {
    pub merge_node_id: NodeId,
    /// Arcs already waiting at the merge node.
    pub arrived: Vec<ArcId>,
    /// Arcs still on their way.
    pub pending: Vec<ArcId>,
}

/// One arc of a split as shown to its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcView {
    pub arc_id: ArcId,
    pub label: String,
    pub description: Option<String>,
    pub members: Vec<ActorId>,
    pub entry_node_id: NodeId,
    pub solo: bool,
}

/// The outcome of entering an arc split node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcAssignments {
    pub split_node_id: NodeId,
    pub merge_node_id: NodeId,
    pub arcs: Vec<ArcView>,
    /// The arc of the actor the instruction is for.
    pub your_arc: Option<ArcId>,
}

impl ArcAssignments {
    /// Builds the view of `state` for `actor`.
    #[must_use]
    pub fn of(state: &ArcSplitState, actor: &ActorId) -> Self {
        Self {
            split_node_id: state.split_node_id.clone(),
            merge_node_id: state.merge_node_id.clone(),
            arcs: state
                .arcs
                .iter()
                .map(|a| ArcView {
                    arc_id: a.arc_id.clone(),
                    label: a.label.clone(),
                    description: a.description.clone(),
                    members: a.members.clone(),
                    entry_node_id: a.entry_node_id.clone(),
                    solo: a.is_solo(),
                })
                .collect(),
            your_arc: state.arc_of(actor).map(|a| a.arc_id.clone()),
        }
    }
}

/// Result of reaching an arc merge node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Other arcs have not arrived yet; re-poll later.
    Waiting { pending: Vec<ArcId> },
    /// Everyone is back together at the merge node.
    Merged {
        merge_node_id: NodeId,
        next_node_id: Option<NodeId>,
    },
    /// The actor is not part of a split; the node behaves like a plain node.
    NotInSplit,
}

/// What the host should present after an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderInstruction {
    ShowNode(NodeView),
    VoteRecorded {
        node_id: NodeId,
        choice_id: ChoiceId,
        tally: Tally,
    },
    AlreadyVoted {
        node_id: NodeId,
        prior: ChoiceId,
    },
    VotingClosed {
        node_id: NodeId,
    },
    VoteResolved {
        node_id: NodeId,
        choice_id: ChoiceId,
        tally: Tally,
        then: Box<RenderInstruction>,
    },
    /// The deadline passed without a single vote.
    NoQuorum {
        node_id: NodeId,
        reopened: bool,
    },
    AlreadyChosen {
        node_id: NodeId,
        choice_id: ChoiceId,
    },
    InsufficientResource {
        resource: String,
        required: u32,
        available: u32,
    },
    /// Entry conditions of the node are not met.
    Blocked {
        node_id: NodeId,
        reason: String,
    },
    ArcAssignments(ArcAssignments),
    WaitingAtMerge {
        merge_node_id: NodeId,
        pending: Vec<ArcId>,
    },
    Merged {
        merge_node_id: NodeId,
        next_node_id: Option<NodeId>,
        node: NodeView,
    },
    StoryComplete {
        story_id: StoryId,
    },
}

impl RenderInstruction {
    /// True for instructions that ask the actor to wait rather than report
    /// a failure.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::WaitingAtMerge { .. } | Self::VoteRecorded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_serialize_with_kind_tag() {
        // Arrange
        let instruction = RenderInstruction::WaitingAtMerge {
            merge_node_id: NodeId::new("n_merge"),
            pending: vec![ArcId::new("scout")],
        };

        // Act
        let json = serde_json::to_value(&instruction).unwrap();

        // Assert
        assert_eq!(json["kind"], "waiting_at_merge");
        assert_eq!(json["pending"][0], "scout");
        assert!(instruction.is_waiting());
    }

    #[test]
    fn test_no_quorum_is_not_a_waiting_state() {
        let instruction = RenderInstruction::NoQuorum {
            node_id: NodeId::new("t1"),
            reopened: false,
        };
        assert!(!instruction.is_waiting());
        assert_eq!(serde_json::to_value(&instruction).unwrap()["kind"], "no_quorum");
    }
}
