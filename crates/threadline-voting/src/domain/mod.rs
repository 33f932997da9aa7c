//! Vote domain types.

pub mod poll;
