//! Domain types for actor sessions.

pub mod session;
