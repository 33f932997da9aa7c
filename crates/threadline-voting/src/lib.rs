//! Threadline — Quorum voting.
//!
//! Resolves shared timed decision points by strict plurality, either early
//! once every expected voter has answered or when the deadline passes.

pub mod application;
pub mod domain;
