//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod rollout;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::scheduler::RolloutScheduler;

/// Shared state for all API handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: Arc<RolloutScheduler>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/api/scheduler/status", get(health::scheduler_status))
        // Rollout endpoints
        .route("/api/rollouts", post(rollout::create_rollout))
        .route("/api/rollouts", get(rollout::list_rollouts))
        .route("/api/rollouts/{id}", get(rollout::get_rollout))
        .route("/api/rollouts/{id}", put(rollout::update_rollout))
        .route("/api/rollouts/{id}", delete(rollout::delete_rollout))
        .route("/api/rollouts/{id}/logs", get(rollout::get_rollout_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
