//! Rollout Service
//!
//! CRUD business logic for rollout definitions. Mutations that can affect an
//! already-admitted rollout notify the scheduler after the write so the
//! in-memory queue stays consistent with the store.

use sqlx::PgPool;
use switchyard_core::domain::log::RolloutLogEntry;
use switchyard_core::domain::rollout::Rollout;
use switchyard_core::dto::rollout::{CreateRollout, RolloutSummary, UpdateRollout};
use uuid::Uuid;

use crate::repository::{log_repository, rollout_repository};
use crate::scheduler::RolloutScheduler;

/// Service error type
#[derive(Debug)]
pub enum RolloutError {
    NotFound(Uuid),
    Validation(String),
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RolloutError {
    fn from(err: sqlx::Error) -> Self {
        RolloutError::Database(err)
    }
}

/// Create a new rollout definition
pub async fn create_rollout(pool: &PgPool, req: CreateRollout) -> Result<Rollout, RolloutError> {
    validate_payload(&req)?;

    let rollout = rollout_repository::create(pool, req).await?;

    tracing::info!("Rollout created: {}", rollout.id);

    Ok(rollout)
}

/// Get a rollout by ID
pub async fn get_rollout(pool: &PgPool, id: Uuid) -> Result<Rollout, RolloutError> {
    let rollout = rollout_repository::find_by_id(pool, id)
        .await?
        .ok_or(RolloutError::NotFound(id))?;

    Ok(rollout)
}

/// List all rollouts as summaries
pub async fn list_rollouts(pool: &PgPool) -> Result<Vec<RolloutSummary>, RolloutError> {
    let rollouts = rollout_repository::list_all(pool).await?;
    Ok(rollouts.iter().map(RolloutSummary::from).collect())
}

/// Replace a rollout's definition
///
/// The replacement resets the launch state, so the scheduler is notified to
/// drop any queue entry the old definition may still hold.
pub async fn update_rollout(
    pool: &PgPool,
    scheduler: &RolloutScheduler,
    id: Uuid,
    req: UpdateRollout,
) -> Result<Rollout, RolloutError> {
    validate_payload(&req)?;

    let rollout = rollout_repository::update(pool, id, req)
        .await?
        .ok_or(RolloutError::NotFound(id))?;

    scheduler.on_rollout_changed(id).await;

    tracing::info!("Rollout updated: {}", id);

    Ok(rollout)
}

/// Delete a rollout and its launch log
pub async fn delete_rollout(
    pool: &PgPool,
    scheduler: &RolloutScheduler,
    id: Uuid,
) -> Result<(), RolloutError> {
    let deleted = rollout_repository::delete(pool, id).await?;
    if !deleted {
        return Err(RolloutError::NotFound(id));
    }

    scheduler.on_rollout_changed(id).await;

    tracing::info!("Rollout deleted: {}", id);

    Ok(())
}

/// Get the launch log of a rollout
pub async fn get_rollout_logs(
    pool: &PgPool,
    id: Uuid,
) -> Result<Vec<RolloutLogEntry>, RolloutError> {
    // Verify the rollout exists so a bad id is NotFound, not an empty log.
    rollout_repository::find_by_id(pool, id)
        .await?
        .ok_or(RolloutError::NotFound(id))?;

    let logs = log_repository::find_by_rollout(pool, id).await?;
    Ok(logs)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_payload(req: &CreateRollout) -> Result<(), RolloutError> {
    if req.name.trim().is_empty() {
        return Err(RolloutError::Validation("name cannot be empty".to_string()));
    }

    if req.target_devices.is_empty() {
        return Err(RolloutError::Validation(
            "at least one target device is required".to_string(),
        ));
    }

    if req.target_devices.iter().any(|d| d.trim().is_empty()) {
        return Err(RolloutError::Validation(
            "target devices cannot be blank".to_string(),
        ));
    }

    Ok(())
}
