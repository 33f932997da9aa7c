//! Threadline Sync — reconciliation layer.
//!
//! Local state is authoritative for the running process. Every local
//! mutation is mirrored to the remote store through an [`outbox::Outbox`]
//! with best-effort, at-most-once delivery; the [`reconcile::Reconciler`]
//! reads the remote copy back on a cache miss.

pub mod memory_store;
pub mod outbox;
pub mod reconcile;
