//! Timer expiries routed back into the engine.

use std::sync::Arc;

use async_trait::async_trait;
use threadline_core::error::DomainError;
use threadline_session::application::timers::{ExpiredTimer, ExpiryHandler};

use crate::config::{EngineConfig, NoQuorumPolicy};
use crate::engine::Engine;

/// Hands expired timers to [`Engine::on_timer_expired`] with the configured
/// empty-vote policy.
#[derive(Debug, Clone)]
pub struct EngineExpiryHandler {
    engine: Arc<Engine>,
    policy: NoQuorumPolicy,
    reopen_seconds: u32,
}

impl EngineExpiryHandler {
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: &EngineConfig) -> Self {
        Self {
            engine,
            policy: config.no_quorum_policy,
            reopen_seconds: config.reopen_seconds,
        }
    }
}

#[async_trait]
impl ExpiryHandler for EngineExpiryHandler {
    async fn on_expired(&self, expired: &ExpiredTimer) -> Result<(), DomainError> {
        self.engine
            .on_timer_expired(expired, self.policy, self.reopen_seconds)
            .await
    }
}
