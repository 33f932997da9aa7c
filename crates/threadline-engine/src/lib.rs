//! Threadline — Group narrative traversal engine.
//!
//! Wires sessions, choice locks, timers, quorum votes and arcs behind the
//! event surface a host calls into: choices submitted, nodes entered, arc
//! splits and merges reached, timers expired.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod render;
