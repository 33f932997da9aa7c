//! Story graphs loaded from YAML or JSON documents.
//!
//! ```yaml
//! id: lighthouse
//! entry: arrival
//! nodes:
//!   - id: arrival
//!     type: choice
//!     choices:
//!       - { id: climb, label: "Climb the stairs", next_node_id: lamp_room }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use threadline_core::graph::{GraphAccessor, StoryNode};
use threadline_core::ids::{NodeId, StoryId};

use crate::error::ConfigError;

/// One story as authored.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryDocument {
    pub id: StoryId,
    #[serde(alias = "entry")]
    pub entry_node_id: NodeId,
    pub nodes: Vec<StoryNode>,
}

#[derive(Debug)]
struct Story {
    entry: NodeId,
    nodes: HashMap<NodeId, StoryNode>,
}

/// Read-only graph over loaded story documents.
#[derive(Debug, Default)]
pub struct StaticStoryGraph {
    stories: RwLock<HashMap<StoryId, Story>>,
}

impl StaticStoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML story document into a new graph.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StoryFormat` if the document does not parse or
    /// is inconsistent.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let doc: StoryDocument =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::StoryFormat(e.to_string()))?;
        let graph = Self::new();
        graph.insert(doc)?;
        Ok(graph)
    }

    /// Parses a JSON story document into a new graph.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StoryFormat` if the document does not parse or
    /// is inconsistent.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: StoryDocument =
            serde_json::from_str(json).map_err(|e| ConfigError::StoryFormat(e.to_string()))?;
        let graph = Self::new();
        graph.insert(doc)?;
        Ok(graph)
    }

    /// Reads a YAML story document from `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StoryRead` if the file cannot be read and
    /// `ConfigError::StoryFormat` if it does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::StoryRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Adds a story, replacing one with the same id.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StoryFormat` for duplicate node ids or an entry
    /// node that does not exist.
    pub fn insert(&self, doc: StoryDocument) -> Result<(), ConfigError> {
        let mut nodes = HashMap::with_capacity(doc.nodes.len());
        for node in doc.nodes {
            let id = node.id.clone();
            if nodes.insert(id.clone(), node).is_some() {
                return Err(ConfigError::StoryFormat(format!(
                    "node {id} defined twice in story {}",
                    doc.id
                )));
            }
        }
        if !nodes.contains_key(&doc.entry_node_id) {
            return Err(ConfigError::StoryFormat(format!(
                "entry node {} missing from story {}",
                doc.entry_node_id, doc.id
            )));
        }
        tracing::info!(story = %doc.id, nodes = nodes.len(), "story loaded");
        self.stories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                doc.id,
                Story {
                    entry: doc.entry_node_id,
                    nodes,
                },
            );
        Ok(())
    }

    /// The entry node of `story`.
    #[must_use]
    pub fn entry(&self, story: &StoryId) -> Option<NodeId> {
        self.stories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(story)
            .map(|s| s.entry.clone())
    }

    /// Ids of the loaded stories.
    #[must_use]
    pub fn story_ids(&self) -> Vec<StoryId> {
        self.stories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl GraphAccessor for StaticStoryGraph {
    fn node(&self, story_id: &StoryId, node_id: &NodeId) -> Option<StoryNode> {
        self.stories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(story_id)
            .and_then(|s| s.nodes.get(node_id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::graph::{NodeKind, PlayerCount};

    const STORY: &str = r#"
id: lighthouse
entry: arrival
nodes:
  - id: arrival
    type: choice
    checkpoint: true
    choices:
      - { id: climb, label: "Climb", next_node_id: split }
  - id: split
    type: arc_split
    arc_split:
      mode: role_based
      merge: reunion
      arcs:
        - { id: scout, player_count: 1, entry: n_scout, required_roles: [scout] }
        - { id: main, player_count: remaining, entry: n_main }
"#;

    #[test]
    fn test_yaml_story_loads_nodes_and_entry() {
        // Act
        let graph = StaticStoryGraph::from_yaml(STORY).unwrap();
        let story = StoryId::new("lighthouse");

        // Assert
        assert_eq!(graph.entry(&story), Some(NodeId::new("arrival")));
        let split = graph.node(&story, &NodeId::new("split")).unwrap();
        assert_eq!(split.kind, NodeKind::ArcSplit);
        let config = split.arc_split.unwrap();
        assert_eq!(config.arcs[1].player_count, PlayerCount::Remaining);
        assert!(graph.node(&story, &NodeId::new("arrival")).unwrap().checkpoint);
    }

    #[test]
    fn test_duplicate_node_ids_are_rejected() {
        let json = r#"{"id":"s","entry":"a","nodes":[
            {"id":"a","type":"narrative"},
            {"id":"a","type":"narrative"}]}"#;
        assert!(matches!(
            StaticStoryGraph::from_json(json),
            Err(ConfigError::StoryFormat(_))
        ));
    }

    #[test]
    fn test_missing_entry_node_is_rejected() {
        let json = r#"{"id":"s","entry":"nowhere","nodes":[{"id":"a","type":"narrative"}]}"#;
        assert!(StaticStoryGraph::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let result = StaticStoryGraph::load(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(result, Err(ConfigError::StoryRead { .. })));
    }
}
