//! Threadline host binary.
//!
//! Loads a story graph, wires the engine to in-process adapters and runs the
//! outbox worker and timer sweeper until interrupted.

use std::error::Error;
use std::sync::Arc;

use threadline_core::clock::SystemClock;
use threadline_core::rng::SystemRng;
use threadline_engine::adapters::delivery::LoggingDelivery;
use threadline_engine::adapters::group_directory::StaticGroupDirectory;
use threadline_engine::adapters::story_graph::StaticStoryGraph;
use threadline_engine::config::EngineConfig;
use threadline_engine::engine::{Engine, EngineDeps};
use threadline_engine::expiry::EngineExpiryHandler;
use threadline_session::application::timers::TimerSweeper;
use threadline_sync::memory_store::InMemoryRemoteStore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Threadline engine");

    let config = EngineConfig::from_env()?;

    let graph = match &config.story_path {
        Some(path) => StaticStoryGraph::load(path)?,
        None => {
            tracing::warn!("THREADLINE_STORY_PATH not set; starting without stories");
            StaticStoryGraph::new()
        }
    };
    for story in graph.story_ids() {
        tracing::info!(story = %story, entry = ?graph.entry(&story), "story available");
    }

    let (engine, worker) = Engine::new(EngineDeps {
        graph: Arc::new(graph),
        groups: Arc::new(StaticGroupDirectory::new()),
        delivery: Arc::new(LoggingDelivery),
        remote: Arc::new(InMemoryRemoteStore::new()),
        clock: Arc::new(SystemClock),
        rng: Box::new(SystemRng::new()),
    });
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = worker.spawn(shutdown_rx.clone());
    let sweeper = TimerSweeper::spawn(
        engine.timers().clone(),
        Arc::new(EngineExpiryHandler::new(Arc::clone(&engine), &config)),
        config.sweep_interval,
        shutdown_rx,
    );
    tracing::info!(
        sweep_interval_ms = config.sweep_interval.as_millis(),
        policy = ?config.no_quorum_policy,
        "engine running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown_tx.send(true)?;
    sweeper.await?;
    worker.await?;

    Ok(())
}
