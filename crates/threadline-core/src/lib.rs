//! Threadline Core — shared domain abstractions.
//!
//! This crate defines the identifiers, error taxonomy, and the traits for
//! every external collaborator the traversal engine talks to: the story
//! graph, the group directory, the remote store and the delivery channel.
//! It contains no infrastructure code.

pub mod clock;
pub mod delivery;
pub mod error;
pub mod graph;
pub mod group;
pub mod ids;
pub mod rng;
pub mod store;
