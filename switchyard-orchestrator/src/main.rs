//! Switchyard Orchestrator
//!
//! Schedules and launches multi-stage configuration rollouts against a fleet
//! of network devices.
//!
//! Architecture:
//! - API: HTTP CRUD surface for rollout definitions and launch logs
//! - Services: Business logic between the API and the repositories
//! - Repositories: PostgreSQL persistence for rollouts and logs
//! - Scheduler: Due-rollout discovery, crash recovery, serialized dispatch
//! - Launch: The staged pipeline driving the device gateway
//!
//! At startup the scheduler recovers any rollout interrupted by a crash,
//! then polls the store on a fixed interval. Dispatch is strictly one
//! rollout at a time.

mod api;
mod config;
mod db;
mod launch;
mod repository;
mod scheduler;
mod service;
mod store;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::launch::LaunchPipeline;
use crate::launch::gateway::{DeviceGatewayClient, gateway_executors};
use crate::scheduler::RolloutScheduler;
use crate::store::{PgRolloutStore, RolloutStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Switchyard Orchestrator");

    let config = Config::from_env();
    config.validate()?;

    info!("Connecting to database");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Wire the store, executors, pipeline, and scheduler
    let store: Arc<dyn RolloutStore> = Arc::new(PgRolloutStore::new(pool.clone()));

    let gateway = DeviceGatewayClient::new(config.gateway_url.clone());
    info!("Device gateway: {}", gateway.base_url());

    let pipeline = Arc::new(LaunchPipeline::new(
        Arc::clone(&store),
        gateway_executors(gateway),
    ));

    let scheduler = Arc::new(RolloutScheduler::new(
        store,
        pipeline,
        config.scheduler.clone(),
    ));

    // Recovery must finish before the first poll tick.
    scheduler
        .recover_from_crash()
        .await
        .context("Crash recovery failed")?;

    scheduler.start();

    // Serve the HTTP API
    let app = api::create_router(api::AppState {
        pool,
        scheduler,
    });

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
