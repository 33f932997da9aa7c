//! Arc domain types and the member assignment algorithm.

pub mod arc;
pub mod assignment;
