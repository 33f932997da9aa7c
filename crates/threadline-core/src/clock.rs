//! Clock abstraction for deadline arithmetic.
//!
//! Every deadline in the engine is computed from a `Clock` so that timers,
//! votes and arc timestamps can be driven from tests without sleeping.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Abstraction over wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed since `since`; negative if `since` is in the future.
    fn millis_since(&self, since: DateTime<Utc>) -> i64 {
        (self.now() - since).num_milliseconds()
    }
}

/// A clock shared between the components of one engine instance.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
