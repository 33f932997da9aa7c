//! Application services for voting.

pub mod resolver;
