//! Rollout Repository
//!
//! Handles all database operations related to rollouts, including the
//! scheduler's due/stuck queries and the conditional status swap that
//! guards every queue admission.

use sqlx::PgPool;
use switchyard_core::domain::rollout::{
    LaunchStatus, Rollout, Stage, StageStatus, StageStatuses,
};
use switchyard_core::dto::rollout::CreateRollout;
use uuid::Uuid;

const ROLLOUT_COLUMNS: &str = r#"
    id, name, description, contact_email, created_by, scheduled_at,
    launch_status, last_updated, pre_check_status, apply_config_status,
    post_check_status, result_diff_status, target_devices, pre_verification,
    apply_settings, post_verification, executed, executed_time
"#;

/// Create a new rollout in the database
pub async fn create(pool: &PgPool, req: CreateRollout) -> Result<Rollout, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let rollout = Rollout {
        id,
        name: req.name,
        description: req.description,
        contact_email: req.contact_email,
        created_by: req.created_by,
        scheduled_at: req.scheduled_at,
        launch_status: LaunchStatus::NotScheduled,
        last_updated: now,
        stages: StageStatuses::default(),
        target_devices: req.target_devices,
        pre_verification: req.pre_verification,
        apply_settings: req.apply_settings,
        post_verification: req.post_verification,
        executed: false,
        executed_time: None,
    };

    sqlx::query(
        r#"
        INSERT INTO rollouts (
            id, name, description, contact_email, created_by, scheduled_at,
            launch_status, last_updated, pre_check_status, apply_config_status,
            post_check_status, result_diff_status, target_devices,
            pre_verification, apply_settings, post_verification, executed
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(id)
    .bind(&rollout.name)
    .bind(&rollout.description)
    .bind(&rollout.contact_email)
    .bind(&rollout.created_by)
    .bind(rollout.scheduled_at)
    .bind(launch_status_to_string(rollout.launch_status))
    .bind(now)
    .bind(stage_status_to_string(StageStatus::NotExecuted))
    .bind(stage_status_to_string(StageStatus::NotExecuted))
    .bind(stage_status_to_string(StageStatus::NotExecuted))
    .bind(stage_status_to_string(StageStatus::NotExecuted))
    .bind(&rollout.target_devices)
    .bind(
        rollout
            .pre_verification
            .as_ref()
            .map(|v| serde_json::to_value(v).unwrap_or_default()),
    )
    .bind(serde_json::to_value(&rollout.apply_settings).unwrap_or_default())
    .bind(
        rollout
            .post_verification
            .as_ref()
            .map(|v| serde_json::to_value(v).unwrap_or_default()),
    )
    .bind(false)
    .execute(pool)
    .await?;

    Ok(rollout)
}

/// Find a rollout by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Rollout>, sqlx::Error> {
    let row = sqlx::query_as::<_, RolloutRow>(&format!(
        "SELECT {ROLLOUT_COLUMNS} FROM rollouts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all rollouts, most recently touched first
pub async fn list_all(pool: &PgPool) -> Result<Vec<Rollout>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RolloutRow>(&format!(
        "SELECT {ROLLOUT_COLUMNS} FROM rollouts ORDER BY last_updated DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Replace a rollout's definition
///
/// Replacing the definition resets the launch state so the scheduler treats
/// the rollout as brand new: status back to `NotScheduled`, stage statuses to
/// `NotExecuted`, executed marker cleared.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    req: CreateRollout,
) -> Result<Option<Rollout>, sqlx::Error> {
    let now = chrono::Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE rollouts
        SET name = $1, description = $2, contact_email = $3, created_by = $4,
            scheduled_at = $5, launch_status = $6, last_updated = $7,
            pre_check_status = $8, apply_config_status = $8,
            post_check_status = $8, result_diff_status = $8,
            target_devices = $9, pre_verification = $10, apply_settings = $11,
            post_verification = $12, executed = FALSE, executed_time = NULL
        WHERE id = $13
        "#,
    )
    .bind(&req.name)
    .bind(&req.description)
    .bind(&req.contact_email)
    .bind(&req.created_by)
    .bind(req.scheduled_at)
    .bind(launch_status_to_string(LaunchStatus::NotScheduled))
    .bind(now)
    .bind(stage_status_to_string(StageStatus::NotExecuted))
    .bind(&req.target_devices)
    .bind(
        req.pre_verification
            .as_ref()
            .map(|v| serde_json::to_value(v).unwrap_or_default()),
    )
    .bind(serde_json::to_value(&req.apply_settings).unwrap_or_default())
    .bind(
        req.post_verification
            .as_ref()
            .map(|v| serde_json::to_value(v).unwrap_or_default()),
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    find_by_id(pool, id).await
}

/// Delete a rollout by ID (launch logs cascade)
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rollouts WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Scheduler Queries
// =============================================================================

/// Find due rollouts that are not yet terminal (crash recovery)
pub async fn find_due_not_terminal(
    pool: &PgPool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<Rollout>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RolloutRow>(&format!(
        r#"
        SELECT {ROLLOUT_COLUMNS}
        FROM rollouts
        WHERE scheduled_at IS NOT NULL
          AND scheduled_at <= $1
          AND launch_status NOT IN ('Success', 'Fail')
        ORDER BY scheduled_at ASC
        "#
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find due `NotScheduled` rollouts not already held in memory (polling)
pub async fn find_due_unqueued(
    pool: &PgPool,
    now: chrono::DateTime<chrono::Utc>,
    excluded_ids: &[Uuid],
) -> Result<Vec<Rollout>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RolloutRow>(&format!(
        r#"
        SELECT {ROLLOUT_COLUMNS}
        FROM rollouts
        WHERE scheduled_at IS NOT NULL
          AND scheduled_at <= $1
          AND launch_status = 'NotScheduled'
          AND id <> ALL($2)
        ORDER BY scheduled_at ASC
        "#
    ))
    .bind(now)
    .bind(excluded_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find rollouts stuck at `Queued` since before the threshold (reclaim)
pub async fn find_stuck_queued(
    pool: &PgPool,
    older_than: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<Rollout>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RolloutRow>(&format!(
        r#"
        SELECT {ROLLOUT_COLUMNS}
        FROM rollouts
        WHERE launch_status = 'Queued'
          AND last_updated < $1
        "#
    ))
    .bind(older_than)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Status Updates
// =============================================================================

/// Unconditional launch-status write; bumps `last_updated`
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: LaunchStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE rollouts
        SET launch_status = $1, last_updated = NOW()
        WHERE id = $2
        "#,
    )
    .bind(launch_status_to_string(status))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Conditional launch-status swap; returns the number of rows affected
///
/// Zero rows means another actor changed the status first; callers treat that
/// as a lost race, not an error.
pub async fn update_status_if_matches(
    pool: &PgPool,
    id: Uuid,
    expected: LaunchStatus,
    new: LaunchStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE rollouts
        SET launch_status = $1, last_updated = NOW()
        WHERE id = $2 AND launch_status = $3
        "#,
    )
    .bind(launch_status_to_string(new))
    .bind(id)
    .bind(launch_status_to_string(expected))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Write one stage's status; bumps `last_updated`
pub async fn update_stage_status(
    pool: &PgPool,
    id: Uuid,
    stage: Stage,
    status: StageStatus,
) -> Result<(), sqlx::Error> {
    let column = match stage {
        Stage::PreCheck => "pre_check_status",
        Stage::ApplyConfig => "apply_config_status",
        Stage::PostCheck => "post_check_status",
        Stage::ResultDiff => "result_diff_status",
    };

    sqlx::query(&format!(
        "UPDATE rollouts SET {column} = $1, last_updated = NOW() WHERE id = $2"
    ))
    .bind(stage_status_to_string(status))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the first successful launch
pub async fn mark_executed(
    pool: &PgPool,
    id: Uuid,
    time: chrono::DateTime<chrono::Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE rollouts
        SET executed = TRUE, executed_time = $1
        WHERE id = $2
        "#,
    )
    .bind(time)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn launch_status_to_string(status: LaunchStatus) -> &'static str {
    match status {
        LaunchStatus::NotScheduled => "NotScheduled",
        LaunchStatus::Queued => "Queued",
        LaunchStatus::InProgress => "InProgress",
        LaunchStatus::Success => "Success",
        LaunchStatus::Fail => "Fail",
    }
}

fn string_to_launch_status(s: &str) -> LaunchStatus {
    match s {
        "NotScheduled" => LaunchStatus::NotScheduled,
        "Queued" => LaunchStatus::Queued,
        "InProgress" => LaunchStatus::InProgress,
        "Success" => LaunchStatus::Success,
        "Fail" => LaunchStatus::Fail,
        _ => LaunchStatus::NotScheduled,
    }
}

fn stage_status_to_string(status: StageStatus) -> &'static str {
    match status {
        StageStatus::NotExecuted => "NotExecuted",
        StageStatus::InProgress => "InProgress",
        StageStatus::Success => "Success",
        StageStatus::Fail => "Fail",
        StageStatus::Skipped => "Skipped",
    }
}

fn string_to_stage_status(s: &str) -> StageStatus {
    match s {
        "NotExecuted" => StageStatus::NotExecuted,
        "InProgress" => StageStatus::InProgress,
        "Success" => StageStatus::Success,
        "Fail" => StageStatus::Fail,
        "Skipped" => StageStatus::Skipped,
        _ => StageStatus::NotExecuted,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RolloutRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    contact_email: Option<String>,
    created_by: Option<String>,
    scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    launch_status: String,
    last_updated: chrono::DateTime<chrono::Utc>,
    pre_check_status: String,
    apply_config_status: String,
    post_check_status: String,
    result_diff_status: String,
    target_devices: Vec<String>,
    pre_verification: Option<serde_json::Value>,
    apply_settings: serde_json::Value,
    post_verification: Option<serde_json::Value>,
    executed: bool,
    executed_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RolloutRow> for Rollout {
    fn from(row: RolloutRow) -> Self {
        let stages = StageStatuses {
            pre_check: string_to_stage_status(&row.pre_check_status),
            apply_config: string_to_stage_status(&row.apply_config_status),
            post_check: string_to_stage_status(&row.post_check_status),
            result_diff: string_to_stage_status(&row.result_diff_status),
        };

        Rollout {
            id: row.id,
            name: row.name,
            description: row.description,
            contact_email: row.contact_email,
            created_by: row.created_by,
            scheduled_at: row.scheduled_at,
            launch_status: string_to_launch_status(&row.launch_status),
            last_updated: row.last_updated,
            stages,
            target_devices: row.target_devices,
            pre_verification: row
                .pre_verification
                .and_then(|v| serde_json::from_value(v).ok()),
            apply_settings: serde_json::from_value(row.apply_settings).unwrap_or_default(),
            post_verification: row
                .post_verification
                .and_then(|v| serde_json::from_value(v).ok()),
            executed: row.executed,
            executed_time: row.executed_time,
        }
    }
}
