//! Threadline — Actor sessions, choice locks and timers.
//!
//! Responsible for the per-actor progress record, the idempotent choice
//! lock ledger, and the per-actor deadlines polled by the timer sweeper.

pub mod application;
pub mod domain;
