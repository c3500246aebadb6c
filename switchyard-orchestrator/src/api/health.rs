//! Health Check API Handlers
//!
//! Health check and scheduler visibility endpoints for monitoring.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::api::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /api/scheduler/status
/// Current state of the in-memory execution queue
pub async fn scheduler_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "queue_size": state.scheduler.queue_len(),
        "executing": state.scheduler.is_executing(),
    }))
}
