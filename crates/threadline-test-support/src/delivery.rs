//! Test delivery channels.

use std::sync::Mutex;

use async_trait::async_trait;
use threadline_core::delivery::DeliveryChannel;
use threadline_core::error::DomainError;
use threadline_core::ids::ActorId;

/// A delivery channel that records every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(ActorId, String)>>,
}

impl RecordingDelivery {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all delivered `(recipient, message)` pairs.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sent(&self) -> Vec<(ActorId, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages delivered to `actor`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sent_to(&self, actor: &ActorId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == actor)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn deliver(&self, actor: &ActorId, message: &str) -> Result<(), DomainError> {
        self.sent
            .lock()
            .unwrap()
            .push((actor.clone(), message.to_owned()));
        Ok(())
    }
}

/// A delivery channel whose every send fails.
#[derive(Debug)]
pub struct FailingDelivery;

#[async_trait]
impl DeliveryChannel for FailingDelivery {
    async fn deliver(&self, actor: &ActorId, _message: &str) -> Result<(), DomainError> {
        Err(DomainError::RemoteSync(format!("recipient {actor} unreachable")))
    }
}
