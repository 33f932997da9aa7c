//! Delivery channel for private, per-actor notifications.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::ids::ActorId;

/// Delivers a message to a single actor.
///
/// Failures are non-fatal: callers log them per recipient and carry on.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Sends `message` to `actor`.
    async fn deliver(&self, actor: &ActorId, message: &str) -> Result<(), DomainError>;
}
