//! Threadline — Arc coordination.
//!
//! Splits a group into concurrent arcs and holds the merge barrier that
//! reunites them at a single convergence node.

pub mod application;
pub mod domain;
