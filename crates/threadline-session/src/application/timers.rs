//! Timer registry and sweeper.
//!
//! Timers are plain deadlines on actor sessions. Nothing fires on its own:
//! callers ask whether a timer has expired, and a periodic sweeper removes
//! expired timers and hands each one to an [`ExpiryHandler`] exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use threadline_core::error::DomainError;
use threadline_core::ids::{ActorId, ChoiceId, NodeId, TimerId};
use threadline_core::store::TimerRecord;
use threadline_sync::outbox::SyncOp;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::SessionStore;

/// A timer the sweeper has removed because its deadline passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTimer {
    /// Timer owner.
    pub actor_id: ActorId,
    /// The removed timer.
    pub timer_id: TimerId,
    /// Node the timer guarded.
    pub node_id: NodeId,
}

/// Reacts to an expired timer.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    /// Called once per expired timer, after the timer was removed.
    async fn on_expired(&self, expired: &ExpiredTimer) -> Result<(), DomainError>;
}

/// Registry of per-actor deadlines.
#[derive(Debug, Clone)]
pub struct TimerRegistry {
    store: Arc<SessionStore>,
}

impl TimerRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Starts (or restarts) `timer` for `actor`, due `duration_seconds` from now.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if `actor` has no session.
    pub fn start(
        &self,
        actor: &ActorId,
        timer: TimerId,
        node: NodeId,
        duration_seconds: u32,
    ) -> Result<TimerRecord, DomainError> {
        let record = TimerRecord {
            timer_id: timer,
            node_id: node,
            started_at: self.store.clock().now(),
            duration_seconds,
        };
        self.store.with_session(actor, |session, outbox| {
            session.insert_timer(record.clone());
            outbox.enqueue(SyncOp::PutTimer {
                actor: actor.clone(),
                record: record.clone(),
            });
        })?;
        tracing::debug!(actor = %actor, timer = %record.timer_id, duration_seconds, "timer started");
        Ok(record)
    }

    /// A copy of `timer`, if it is active.
    #[must_use]
    pub fn get(&self, actor: &ActorId, timer: &TimerId) -> Option<TimerRecord> {
        self.store
            .sessions()
            .get(actor)
            .and_then(|s| s.timer(timer).cloned())
    }

    fn elapsed_millis(&self, record: &TimerRecord) -> i64 {
        self.store.clock().millis_since(record.started_at)
    }

    /// Whether `timer` has run out. An absent timer counts as expired.
    #[must_use]
    pub fn is_expired(&self, actor: &ActorId, timer: &TimerId) -> bool {
        self.get(actor, timer)
            .is_none_or(|record| self.elapsed_millis(&record) >= duration_millis(&record))
    }

    /// Whole seconds left on `timer`, rounded up; zero once expired or absent.
    #[must_use]
    pub fn remaining_seconds(&self, actor: &ActorId, timer: &TimerId) -> u32 {
        let Some(record) = self.get(actor, timer) else {
            return 0;
        };
        let remaining = (duration_millis(&record) - self.elapsed_millis(&record)).max(0);
        u32::try_from((remaining + 999) / 1000).unwrap_or(u32::MAX)
    }

    /// Removes `timer`; returns whether it was active.
    pub fn clear(&self, actor: &ActorId, timer: &TimerId) -> bool {
        self.store
            .with_session(actor, |session, outbox| {
                let removed = session.remove_timer(timer).is_some();
                if removed {
                    outbox.enqueue(SyncOp::ClearTimer {
                        actor: actor.clone(),
                        timer: timer.clone(),
                    });
                }
                removed
            })
            .unwrap_or(false)
    }

    /// Removes every timer of `actor` guarding `node`.
    pub fn clear_for_node(&self, actor: &ActorId, node: &NodeId) -> Vec<TimerId> {
        self.store
            .with_session(actor, |session, outbox| {
                session
                    .remove_timers_where(|t| &t.node_id == node)
                    .into_iter()
                    .map(|record| {
                        outbox.enqueue(SyncOp::ClearTimer {
                            actor: actor.clone(),
                            timer: record.timer_id.clone(),
                        });
                        record.timer_id
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes and returns every expired timer across all sessions. A timer
    /// is returned by at most one call.
    pub fn take_expired(&self) -> Vec<ExpiredTimer> {
        let clock = Arc::clone(self.store.clock());
        let mut sessions = self.store.sessions();
        let outbox = self.store.outbox();
        let mut expired = Vec::new();
        for (actor, session) in sessions.iter_mut() {
            let due = session.remove_timers_where(|t| {
                clock.millis_since(t.started_at) >= duration_millis(t)
            });
            for record in due {
                outbox.enqueue(SyncOp::ClearTimer {
                    actor: actor.clone(),
                    timer: record.timer_id.clone(),
                });
                expired.push(ExpiredTimer {
                    actor_id: actor.clone(),
                    timer_id: record.timer_id,
                    node_id: record.node_id,
                });
            }
        }
        expired
    }

    /// Takes every expired timer and runs `handler` on each. Handler errors
    /// are logged; the timer stays removed. Returns the number handled.
    pub async fn sweep_once(&self, handler: &dyn ExpiryHandler) -> usize {
        let expired = self.take_expired();
        for timer in &expired {
            if let Err(e) = handler.on_expired(timer).await {
                tracing::warn!(
                    actor = %timer.actor_id,
                    timer = %timer.timer_id,
                    node = %timer.node_id,
                    error = %e,
                    "timer expiry handler failed"
                );
            }
        }
        expired.len()
    }
}

fn duration_millis(record: &TimerRecord) -> i64 {
    i64::from(record.duration_seconds) * 1000
}

/// Default expiry policy: record a synthetic timeout choice and stay put.
#[derive(Debug, Clone)]
pub struct StallOnTimeout {
    store: Arc<SessionStore>,
}

impl StallOnTimeout {
    /// Creates the handler over `store`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExpiryHandler for StallOnTimeout {
    async fn on_expired(&self, expired: &ExpiredTimer) -> Result<(), DomainError> {
        self.store.update(&expired.actor_id, |session| {
            session.record_choice(ChoiceId::timeout(&expired.node_id), None);
        })?;
        tracing::info!(actor = %expired.actor_id, node = %expired.node_id, "timer expired; actor stalled");
        Ok(())
    }
}

/// Background task polling a [`TimerRegistry`].
#[derive(Debug)]
pub struct TimerSweeper;

impl TimerSweeper {
    /// Sweeps `registry` every `interval` until `shutdown` flips to `true`.
    #[must_use]
    pub fn spawn(
        registry: TimerRegistry,
        handler: Arc<dyn ExpiryHandler>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let handled = registry.sweep_once(handler.as_ref()).await;
                        if handled > 0 {
                            tracing::debug!(handled, "timer sweep");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("timer sweeper stopped");
        })
    }
}
