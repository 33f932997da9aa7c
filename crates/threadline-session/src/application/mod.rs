//! Application services over the session store.

pub mod ledger;
pub mod store;
pub mod timers;
