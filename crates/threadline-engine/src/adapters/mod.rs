//! In-process implementations of the collaborator traits, used by the host
//! binary and by tests.

pub mod delivery;
pub mod group_directory;
pub mod story_graph;
