//! Rollout API Handlers
//!
//! HTTP endpoints for rollout definitions and their launch logs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use switchyard_core::domain::log::RolloutLogEntry;
use switchyard_core::domain::rollout::Rollout;
use switchyard_core::dto::rollout::{CreateRollout, RolloutSummary, UpdateRollout};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::rollout_service;

/// POST /api/rollouts
/// Create a new rollout definition
pub async fn create_rollout(
    State(state): State<AppState>,
    Json(req): Json<CreateRollout>,
) -> ApiResult<(StatusCode, Json<Rollout>)> {
    tracing::info!("Creating rollout: {}", req.name);

    let rollout = rollout_service::create_rollout(&state.pool, req)
        .await
        .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(rollout)))
}

/// GET /api/rollouts
/// List all rollouts
pub async fn list_rollouts(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RolloutSummary>>> {
    tracing::debug!("Listing rollouts");

    let rollouts = rollout_service::list_rollouts(&state.pool)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rollouts))
}

/// GET /api/rollouts/{id}
/// Get rollout details by ID
pub async fn get_rollout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Rollout>> {
    tracing::debug!("Getting rollout: {}", id);

    let rollout = rollout_service::get_rollout(&state.pool, id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rollout))
}

/// PUT /api/rollouts/{id}
/// Replace a rollout's definition
pub async fn update_rollout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRollout>,
) -> ApiResult<Json<Rollout>> {
    tracing::info!("Updating rollout: {}", id);

    let rollout = rollout_service::update_rollout(&state.pool, &state.scheduler, id, req)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(rollout))
}

/// DELETE /api/rollouts/{id}
/// Delete a rollout and its launch log
pub async fn delete_rollout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting rollout: {}", id);

    rollout_service::delete_rollout(&state.pool, &state.scheduler, id)
        .await
        .map_err(ApiError::from)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/rollouts/{id}/logs
/// Get the launch log of a rollout
pub async fn get_rollout_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<RolloutLogEntry>>> {
    tracing::debug!("Getting logs for rollout: {}", id);

    let logs = rollout_service::get_rollout_logs(&state.pool, id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(logs))
}
