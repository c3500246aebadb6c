//! Rollout store seam
//!
//! The scheduling engine and launch pipeline only ever touch persisted state
//! through [`RolloutStore`]. The trait is deliberately narrow: point lookups,
//! the three scheduler queries, status writes (one conditional, one not), and
//! the launch log. [`PgRolloutStore`] is the production implementation,
//! delegating to the repository modules.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use switchyard_core::domain::log::{LogLevel, RolloutLogEntry};
use switchyard_core::domain::rollout::{LaunchStatus, Rollout, Stage, StageStatus};
use uuid::Uuid;

use crate::repository::{log_repository, rollout_repository};

#[async_trait]
pub trait RolloutStore: Send + Sync {
    /// Due rollouts whose status is outside {Success, Fail}.
    async fn find_due_not_terminal(&self, now: DateTime<Utc>) -> Result<Vec<Rollout>>;

    /// Due `NotScheduled` rollouts whose id is not in `excluded`.
    async fn find_due_unqueued(
        &self,
        now: DateTime<Utc>,
        excluded: &[Uuid],
    ) -> Result<Vec<Rollout>>;

    /// `Queued` rollouts whose `last_updated` is before the threshold.
    async fn find_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Rollout>>;

    /// Conditional status swap. Returns the number of rows affected (0 or 1);
    /// updates `last_updated` as a side effect on success.
    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: LaunchStatus,
        new: LaunchStatus,
    ) -> Result<u64>;

    /// Unconditional status write, for transitions where no race is possible.
    async fn set_status(&self, id: Uuid, new: LaunchStatus) -> Result<()>;

    async fn set_stage_status(&self, id: Uuid, stage: Stage, status: StageStatus) -> Result<()>;

    /// Record the first successful launch; called at most once per rollout.
    async fn mark_executed(&self, id: Uuid, time: DateTime<Utc>) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Rollout>>;

    async fn clear_log(&self, id: Uuid) -> Result<()>;

    async fn append_log(&self, id: Uuid, level: LogLevel, message: String) -> Result<()>;
}

/// PostgreSQL-backed store
pub struct PgRolloutStore {
    pool: PgPool,
}

impl PgRolloutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RolloutStore for PgRolloutStore {
    async fn find_due_not_terminal(&self, now: DateTime<Utc>) -> Result<Vec<Rollout>> {
        Ok(rollout_repository::find_due_not_terminal(&self.pool, now).await?)
    }

    async fn find_due_unqueued(
        &self,
        now: DateTime<Utc>,
        excluded: &[Uuid],
    ) -> Result<Vec<Rollout>> {
        Ok(rollout_repository::find_due_unqueued(&self.pool, now, excluded).await?)
    }

    async fn find_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Rollout>> {
        Ok(rollout_repository::find_stuck_queued(&self.pool, older_than).await?)
    }

    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: LaunchStatus,
        new: LaunchStatus,
    ) -> Result<u64> {
        Ok(rollout_repository::update_status_if_matches(&self.pool, id, expected, new).await?)
    }

    async fn set_status(&self, id: Uuid, new: LaunchStatus) -> Result<()> {
        Ok(rollout_repository::update_status(&self.pool, id, new).await?)
    }

    async fn set_stage_status(&self, id: Uuid, stage: Stage, status: StageStatus) -> Result<()> {
        Ok(rollout_repository::update_stage_status(&self.pool, id, stage, status).await?)
    }

    async fn mark_executed(&self, id: Uuid, time: DateTime<Utc>) -> Result<()> {
        Ok(rollout_repository::mark_executed(&self.pool, id, time).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Rollout>> {
        Ok(rollout_repository::find_by_id(&self.pool, id).await?)
    }

    async fn clear_log(&self, id: Uuid) -> Result<()> {
        log_repository::clear(&self.pool, id).await?;
        Ok(())
    }

    async fn append_log(&self, id: Uuid, level: LogLevel, message: String) -> Result<()> {
        let entry = RolloutLogEntry {
            timestamp: Utc::now(),
            level,
            message,
        };
        Ok(log_repository::add_entry(&self.pool, id, entry).await?)
    }
}
