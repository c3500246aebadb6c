//! Launch pipeline
//!
//! Drives one rollout through its stages in order: simulation gate,
//! pre-check, apply config, post-check, result diff, finalization. Every
//! stage transition is written to the store and mirrored into the rollout's
//! launch log; the first failing stage aborts the rest of the run.
//!
//! Stage failures are terminal for the rollout but never for the process:
//! `run` returns `Err` only when the store itself fails.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use switchyard_core::domain::log::LogLevel;
use switchyard_core::domain::rollout::{LaunchStatus, Rollout, Stage, StageStatus};

use crate::launch::executor::{CheckReport, StageExecutors};
use crate::store::RolloutStore;

/// How a mandatory stage (or the whole stage sequence) ended
enum StageOutcome {
    Passed,
    Failed(String),
}

/// How the post-check stage ended
enum PostCheckOutcome {
    Passed(CheckReport),
    Skipped,
    Failed(String),
}

pub struct LaunchPipeline {
    store: Arc<dyn RolloutStore>,
    executors: StageExecutors,
}

impl LaunchPipeline {
    pub fn new(store: Arc<dyn RolloutStore>, executors: StageExecutors) -> Self {
        Self { store, executors }
    }

    /// Runs the full launch for one rollout.
    pub async fn run(&self, id: Uuid) -> Result<()> {
        info!("Starting launch for rollout {}", id);

        let Some(rollout) = self.store.get(id).await? else {
            warn!("Rollout {} not found, nothing to launch", id);
            return Ok(());
        };

        self.store.clear_log(id).await?;

        // The gate fails the rollout before any stage slot is touched.
        if rollout.apply_settings.simulation_required && !self.simulation_gate(&rollout).await? {
            return Ok(());
        }

        self.store.set_status(id, LaunchStatus::InProgress).await?;
        self.log(id, LogLevel::Info, "Launch process started").await?;

        match self.run_stages(&rollout).await? {
            StageOutcome::Passed => self.finalize_success(id).await,
            StageOutcome::Failed(message) => self.finalize_failure(id, message).await,
        }
    }

    /// Evaluates the simulation gate.
    ///
    /// Returns `Ok(false)` when the gate failed and the rollout was driven
    /// straight to `Fail` without any stage status changing.
    async fn simulation_gate(&self, rollout: &Rollout) -> Result<bool> {
        let id = rollout.id;

        if rollout.apply_settings.device_config.is_empty() {
            self.log(
                id,
                LogLevel::Error,
                "Missing device configuration for simulation",
            )
            .await?;
            self.store.set_status(id, LaunchStatus::Fail).await?;
            return Ok(false);
        }

        self.log(id, LogLevel::Info, "Running configuration simulation")
            .await?;
        if let Err(e) = self
            .executors
            .simulation
            .simulate(&rollout.apply_settings.device_config)
            .await
        {
            self.log(id, LogLevel::Error, format!("Simulation failed: {e:#}"))
                .await?;
            self.store.set_status(id, LaunchStatus::Fail).await?;
            return Ok(false);
        }

        self.log(id, LogLevel::Info, "Simulation completed successfully")
            .await?;
        Ok(true)
    }

    async fn run_stages(&self, rollout: &Rollout) -> Result<StageOutcome> {
        if let StageOutcome::Failed(message) = self.pre_check_stage(rollout).await? {
            return Ok(StageOutcome::Failed(message));
        }

        if let StageOutcome::Failed(message) = self.apply_config_stage(rollout).await? {
            return Ok(StageOutcome::Failed(message));
        }

        match self.post_check_stage(rollout).await? {
            PostCheckOutcome::Skipped => Ok(StageOutcome::Passed),
            PostCheckOutcome::Failed(message) => Ok(StageOutcome::Failed(message)),
            PostCheckOutcome::Passed(report) => self.result_diff_stage(rollout, &report).await,
        }
    }

    async fn pre_check_stage(&self, rollout: &Rollout) -> Result<StageOutcome> {
        let id = rollout.id;
        self.log(id, LogLevel::Info, "Starting pre-check").await?;
        self.store
            .set_stage_status(id, Stage::PreCheck, StageStatus::InProgress)
            .await?;

        match self.executors.pre_check.run_pre_check(rollout).await {
            Ok(()) => {
                self.store
                    .set_stage_status(id, Stage::PreCheck, StageStatus::Success)
                    .await?;
                self.log(id, LogLevel::Info, "Pre-check completed successfully")
                    .await?;
                Ok(StageOutcome::Passed)
            }
            Err(e) => {
                self.store
                    .set_stage_status(id, Stage::PreCheck, StageStatus::Fail)
                    .await?;
                let message = format!("Pre-check failed: {e:#}");
                self.log(id, LogLevel::Error, message.clone()).await?;
                Ok(StageOutcome::Failed(message))
            }
        }
    }

    async fn apply_config_stage(&self, rollout: &Rollout) -> Result<StageOutcome> {
        let id = rollout.id;
        self.log(id, LogLevel::Info, "Starting config apply").await?;
        self.store
            .set_stage_status(id, Stage::ApplyConfig, StageStatus::InProgress)
            .await?;

        match self.executors.applier.apply_config(rollout).await {
            Ok(()) => {
                self.store
                    .set_stage_status(id, Stage::ApplyConfig, StageStatus::Success)
                    .await?;
                self.log(id, LogLevel::Info, "Config apply completed").await?;
                Ok(StageOutcome::Passed)
            }
            Err(e) => {
                self.store
                    .set_stage_status(id, Stage::ApplyConfig, StageStatus::Fail)
                    .await?;
                let message = format!("Config apply failed: {e:#}");
                self.log(id, LogLevel::Error, message.clone()).await?;
                Ok(StageOutcome::Failed(message))
            }
        }
    }

    async fn post_check_stage(&self, rollout: &Rollout) -> Result<PostCheckOutcome> {
        let id = rollout.id;

        let Some(verification) = &rollout.post_verification else {
            self.log(
                id,
                LogLevel::Info,
                "No post-verification data, skipping post-check and result diff",
            )
            .await?;
            self.store
                .set_stage_status(id, Stage::PostCheck, StageStatus::Skipped)
                .await?;
            self.store
                .set_stage_status(id, Stage::ResultDiff, StageStatus::Skipped)
                .await?;
            return Ok(PostCheckOutcome::Skipped);
        };

        self.log(id, LogLevel::Info, "Starting post-check").await?;
        self.store
            .set_stage_status(id, Stage::PostCheck, StageStatus::InProgress)
            .await?;

        match self
            .executors
            .post_check
            .run_post_check(rollout, verification)
            .await
        {
            Ok(report) => {
                self.store
                    .set_stage_status(id, Stage::PostCheck, StageStatus::Success)
                    .await?;
                self.log(id, LogLevel::Info, "Post-check completed successfully")
                    .await?;
                Ok(PostCheckOutcome::Passed(report))
            }
            Err(e) => {
                self.store
                    .set_stage_status(id, Stage::PostCheck, StageStatus::Fail)
                    .await?;
                let message = format!("Post-check failed: {e:#}");
                self.log(id, LogLevel::Error, message.clone()).await?;
                Ok(PostCheckOutcome::Failed(message))
            }
        }
    }

    async fn result_diff_stage(
        &self,
        rollout: &Rollout,
        report: &CheckReport,
    ) -> Result<StageOutcome> {
        let id = rollout.id;
        // post_check_stage only reaches here with verification data present.
        let criteria = rollout
            .post_verification
            .as_ref()
            .map(|v| v.criteria.as_slice())
            .unwrap_or_default();

        self.log(id, LogLevel::Info, "Starting result diff").await?;
        self.store
            .set_stage_status(id, Stage::ResultDiff, StageStatus::InProgress)
            .await?;

        match self.executors.diff.evaluate(report, criteria).await {
            Ok(()) => {
                self.store
                    .set_stage_status(id, Stage::ResultDiff, StageStatus::Success)
                    .await?;
                self.log(id, LogLevel::Info, "Result diff completed successfully")
                    .await?;
                Ok(StageOutcome::Passed)
            }
            Err(e) => {
                self.store
                    .set_stage_status(id, Stage::ResultDiff, StageStatus::Fail)
                    .await?;
                let message = format!("Result diff failed: {e:#}");
                self.log(id, LogLevel::Error, message.clone()).await?;
                Ok(StageOutcome::Failed(message))
            }
        }
    }

    async fn finalize_success(&self, id: Uuid) -> Result<()> {
        self.store.mark_executed(id, Utc::now()).await?;
        self.store.set_status(id, LaunchStatus::Success).await?;
        self.log(id, LogLevel::Info, "Launch process completed successfully")
            .await?;
        info!("Launch succeeded for rollout {}", id);
        Ok(())
    }

    async fn finalize_failure(&self, id: Uuid, message: String) -> Result<()> {
        self.store.set_status(id, LaunchStatus::Fail).await?;
        self.log(id, LogLevel::Error, format!("Launch process failed: {message}"))
            .await?;
        error!("Launch failed for rollout {}: {}", id, message);
        Ok(())
    }

    async fn log(&self, id: Uuid, level: LogLevel, message: impl Into<String>) -> Result<()> {
        self.store.append_log(id, level, message.into()).await
    }
}
