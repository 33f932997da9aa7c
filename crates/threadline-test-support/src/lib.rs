//! Shared test doubles for the Threadline group traversal engine.

mod clock;
mod delivery;
mod rng;
mod store;

pub use clock::{FixedClock, ManualClock, fixed_now};
pub use delivery::{FailingDelivery, RecordingDelivery};
pub use rng::{MockRng, SequenceRng};
pub use store::{FailingRemoteStore, FlakyRemoteStore};
