//! Application services for arcs.

pub mod coordinator;
