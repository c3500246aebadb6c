//! Launch Log Repository
//!
//! Handles all database operations related to rollout launch logs.

use sqlx::PgPool;
use switchyard_core::domain::log::{LogLevel, RolloutLogEntry};
use uuid::Uuid;

/// Append one log entry for a rollout
pub async fn add_entry(
    pool: &PgPool,
    rollout_id: Uuid,
    entry: RolloutLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO rollout_logs (rollout_id, timestamp, level, message)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(rollout_id)
    .bind(entry.timestamp)
    .bind(level_to_string(entry.level))
    .bind(&entry.message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get all log entries for a rollout, oldest first
pub async fn find_by_rollout(
    pool: &PgPool,
    rollout_id: Uuid,
) -> Result<Vec<RolloutLogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, message
        FROM rollout_logs
        WHERE rollout_id = $1
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(rollout_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete all logs for a rollout (a fresh launch starts with an empty log)
pub async fn clear(pool: &PgPool, rollout_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rollout_logs WHERE rollout_id = $1")
        .bind(rollout_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn level_to_string(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "Debug",
        LogLevel::Info => "Info",
        LogLevel::Warning => "Warning",
        LogLevel::Error => "Error",
    }
}

fn string_to_level(s: &str) -> LogLevel {
    match s {
        "Debug" => LogLevel::Debug,
        "Info" => LogLevel::Info,
        "Warning" => LogLevel::Warning,
        "Error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<LogRow> for RolloutLogEntry {
    fn from(row: LogRow) -> Self {
        RolloutLogEntry {
            timestamp: row.timestamp,
            level: string_to_level(&row.level),
            message: row.message,
        }
    }
}
