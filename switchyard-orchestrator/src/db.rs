use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create rollouts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rollouts (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            contact_email VARCHAR(255),
            created_by VARCHAR(255),
            scheduled_at TIMESTAMPTZ,
            launch_status VARCHAR(50) NOT NULL,
            last_updated TIMESTAMPTZ NOT NULL,
            pre_check_status VARCHAR(50) NOT NULL,
            apply_config_status VARCHAR(50) NOT NULL,
            post_check_status VARCHAR(50) NOT NULL,
            result_diff_status VARCHAR(50) NOT NULL,
            target_devices TEXT[] NOT NULL DEFAULT '{}',
            pre_verification JSONB,
            apply_settings JSONB NOT NULL DEFAULT '{}',
            post_verification JSONB,
            executed BOOLEAN NOT NULL DEFAULT FALSE,
            executed_time TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create launch log table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rollout_logs (
            id SERIAL PRIMARY KEY,
            rollout_id UUID NOT NULL REFERENCES rollouts(id) ON DELETE CASCADE,
            timestamp TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes backing the scheduler queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rollouts_status ON rollouts(launch_status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rollouts_scheduled_at ON rollouts(scheduled_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rollouts_last_updated ON rollouts(launch_status, last_updated)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rollout_logs_rollout_id ON rollout_logs(rollout_id, timestamp)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
