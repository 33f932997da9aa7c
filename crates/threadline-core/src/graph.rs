//! Read-only view of the story graph.
//!
//! Story content is authored elsewhere; the engine only reads the fields
//! below. Field names follow the authoring format, so a node definition can
//! be deserialized straight from YAML or JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ArcId, ChoiceId, NodeId, StoryId};

/// Read access to story nodes.
pub trait GraphAccessor: Send + Sync {
    /// Returns the node `node_id` of story `story_id`, if it exists.
    fn node(&self, story_id: &StoryId, node_id: &NodeId) -> Option<StoryNode>;
}

/// Node type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Plain narrative beat.
    Narrative,
    /// Untimed choice; each actor resolves it individually.
    Choice,
    /// Shared decision resolved by quorum vote under a deadline.
    Timed,
    /// Splits the group into arcs.
    ArcSplit,
    /// Convergence point for every arc of a split.
    ArcMerge,
}

/// One selectable option of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice identifier, unique within the node.
    pub id: ChoiceId,
    /// Display label.
    pub label: String,
    /// Resources deducted when the choice is taken.
    #[serde(default)]
    pub cost: BTreeMap<String, u32>,
    /// Destination node; `None` ends the story.
    #[serde(default, alias = "nextNodeId")]
    pub next_node_id: Option<NodeId>,
    /// Whether the UI acknowledges the choice privately before advancing.
    #[serde(default)]
    pub ephemeral_confirmation: bool,
}

/// Deadline attached to a timed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    /// Length of the decision window.
    pub duration_seconds: u32,
}

/// How members are distributed over arcs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Required roles first, then preferred roles, then random fill.
    RoleBased,
    /// Uniform random fill only.
    Random,
}

/// Capacity of an arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PlayerCountRepr", into = "PlayerCountRepr")]
pub enum PlayerCount {
    /// Exactly this many members.
    Fixed(u32),
    /// Everyone left once fixed-capacity arcs are filled.
    Remaining,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PlayerCountRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<PlayerCountRepr> for PlayerCount {
    type Error = String;

    fn try_from(repr: PlayerCountRepr) -> Result<Self, Self::Error> {
        match repr {
            PlayerCountRepr::Count(n) => Ok(Self::Fixed(n)),
            PlayerCountRepr::Keyword(k) if k == "remaining" => Ok(Self::Remaining),
            PlayerCountRepr::Keyword(k) => Err(format!(
                "player_count must be a number or \"remaining\", got {k:?}"
            )),
        }
    }
}

impl From<PlayerCount> for PlayerCountRepr {
    fn from(count: PlayerCount) -> Self {
        match count {
            PlayerCount::Fixed(n) => Self::Count(n),
            PlayerCount::Remaining => Self::Keyword("remaining".to_owned()),
        }
    }
}

/// One arc declared by an arc split node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcDefinition {
    /// Arc identifier, unique within the split.
    pub id: ArcId,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Optional flavour text.
    #[serde(default)]
    pub description: Option<String>,
    /// Capacity.
    pub player_count: PlayerCount,
    /// First node of the arc.
    #[serde(alias = "entry")]
    pub entry_node_id: NodeId,
    /// Roles pulled into this arc first (role-based mode).
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Roles preferred for the remaining capacity (role-based mode).
    #[serde(default)]
    pub preferred_roles: Vec<String>,
}

/// Configuration of an arc split node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcSplitConfig {
    /// Assignment strategy.
    #[serde(alias = "mode")]
    pub split_mode: SplitMode,
    /// Arcs in declaration order.
    pub arcs: Vec<ArcDefinition>,
    /// Node where every arc converges.
    #[serde(alias = "merge")]
    pub merge_node_id: NodeId,
}

/// Conditions an actor must meet to enter a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    /// Flags that must be set.
    #[serde(default)]
    pub required_flags: Vec<String>,
    /// Items that must be held.
    #[serde(default)]
    pub required_items: Vec<String>,
    /// Minimum active group size.
    #[serde(default)]
    pub min_player_count: Option<u32>,
    /// Maximum active group size.
    #[serde(default)]
    pub max_player_count: Option<u32>,
    /// The actor must be in this arc.
    #[serde(default)]
    pub required_arc: Option<ArcId>,
    /// The actor must not be in any of these arcs.
    #[serde(default)]
    pub excluded_arcs: Vec<ArcId>,
}

/// Private message sent to group members holding a role when a node is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmDelivery {
    /// Role of the recipients.
    pub recipient_role: String,
    /// Message text.
    pub text: String,
}

/// A node as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryNode {
    /// Node identifier.
    pub id: NodeId,
    /// Node type.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Optional title passed through to render instructions.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional body text passed through to render instructions.
    #[serde(default)]
    pub body: Option<String>,
    /// Options offered by the node.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Decision window for timed nodes.
    #[serde(default)]
    pub timer: Option<TimerSpec>,
    /// Split configuration for arc split nodes.
    #[serde(default)]
    pub arc_split: Option<ArcSplitConfig>,
    /// Continuation for nodes that offer no choices.
    #[serde(default, alias = "nextNodeId")]
    pub next_node_id: Option<NodeId>,
    /// Arc this node belongs to, scoping its DM deliveries.
    #[serde(default)]
    pub arc_context: Option<ArcId>,
    /// Entry conditions.
    #[serde(default)]
    pub preconditions: Preconditions,
    /// Role-targeted private messages sent on entry.
    #[serde(default)]
    pub dm_deliveries: Vec<DmDelivery>,
    /// Entering the node records it as a checkpoint on the session.
    #[serde(default)]
    pub checkpoint: bool,
}

impl StoryNode {
    /// Looks up a choice by id.
    #[must_use]
    pub fn choice(&self, choice_id: &ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|c| &c.id == choice_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_split_config_parses_remaining_and_entry_alias() {
        // Arrange
        let yaml = r#"
split_mode: role_based
merge_node_id: n_merge
arcs:
  - id: scout
    required_roles: [scout]
    player_count: 1
    entry: n_scout
  - id: main
    player_count: remaining
    entry: n_main
"#;

        // Act
        let config: ArcSplitConfig = serde_yaml::from_str(yaml).unwrap();

        // Assert
        assert_eq!(config.split_mode, SplitMode::RoleBased);
        assert_eq!(config.arcs[0].player_count, PlayerCount::Fixed(1));
        assert_eq!(config.arcs[0].entry_node_id, NodeId::new("n_scout"));
        assert_eq!(config.arcs[1].player_count, PlayerCount::Remaining);
    }

    #[test]
    fn test_player_count_rejects_unknown_keyword() {
        let result: Result<PlayerCount, _> = serde_json::from_str("\"everyone\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_story_node_choice_lookup() {
        let node: StoryNode = serde_json::from_value(serde_json::json!({
            "id": "n1",
            "type": "timed",
            "timer": { "duration_seconds": 30 },
            "choices": [
                { "id": "x", "label": "Go left", "next_node_id": "n2" },
                { "id": "y", "label": "Go right" }
            ]
        }))
        .unwrap();

        assert_eq!(node.kind, NodeKind::Timed);
        let x = node.choice(&ChoiceId::new("x")).unwrap();
        assert_eq!(x.next_node_id, Some(NodeId::new("n2")));
        assert!(node.choice(&ChoiceId::new("z")).is_none());
    }
}
