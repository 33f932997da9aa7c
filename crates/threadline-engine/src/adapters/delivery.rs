//! Delivery channel that writes messages to the log.

use async_trait::async_trait;
use threadline_core::delivery::DeliveryChannel;
use threadline_core::error::DomainError;
use threadline_core::ids::ActorId;

/// Logs every message instead of sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDelivery;

#[async_trait]
impl DeliveryChannel for LoggingDelivery {
    async fn deliver(&self, actor: &ActorId, message: &str) -> Result<(), DomainError> {
        tracing::info!(recipient = %actor, message, "delivery");
        Ok(())
    }
}
