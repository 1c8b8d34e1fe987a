//! PowerWatch - Power Outage Monitoring Service
//!
//! Probes a fleet of network checkpoints over HTTP and derives power outages
//! from how many of them stop answering.

mod config;
mod db;
mod outage;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::ProbeExecutor;
use scheduler::{RetentionManager, Scheduler};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("powerwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PowerWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        "Outage threshold {:.0}%, probe timeout {:?}, up to {} probes in flight",
        cfg.outage_threshold * 100.0,
        cfg.probe_timeout,
        cfg.max_concurrency
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let checkpoints = store.list_checkpoints(false)?;
    if checkpoints.is_empty() {
        tracing::warn!("No checkpoints registered yet; add some through POST /api/checkpoints");
    } else {
        tracing::info!("Monitoring {} registered checkpoints", checkpoints.len());
    }

    // Create scheduler and retention manager
    let prober = Arc::new(ProbeExecutor::new()?);
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober, &cfg)?);
    let retention = Arc::new(RetentionManager::new(
        store.clone(),
        cfg.retention_days,
        cfg.sweep_interval,
    ));

    scheduler.start().await;
    retention.start().await;

    // Serve until shutdown is requested
    let server = Server::new(cfg, store, scheduler.clone());
    let served = server.start().await;

    scheduler.stop().await;
    retention.stop().await;

    served
}
