//! Rollout domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled configuration rollout against a set of network devices
///
/// Structure shared between the CRUD surface (persists) and the scheduling
/// engine / launch pipeline (updates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollout {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_by: Option<String>,
    /// When the rollout becomes eligible to launch. `None` means the rollout
    /// is never picked up by the scheduler.
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub launch_status: LaunchStatus,
    /// Timestamp of the most recent status write; drives stuck-queue reclaim.
    pub last_updated: chrono::DateTime<chrono::Utc>,
    pub stages: StageStatuses,
    pub target_devices: Vec<String>,
    pub pre_verification: Option<PreVerification>,
    pub apply_settings: ApplySettings,
    pub post_verification: Option<PostVerification>,
    /// Set exactly once, on the first successful launch.
    pub executed: bool,
    pub executed_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Rollout {
    /// True once the launch status can no longer change on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.launch_status,
            LaunchStatus::Success | LaunchStatus::Fail
        )
    }
}

/// Overall launch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchStatus {
    NotScheduled,
    Queued,
    InProgress,
    Success,
    Fail,
}

/// Status of a single pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    NotExecuted,
    InProgress,
    Success,
    Fail,
    /// The stage was deliberately not run (e.g. no post-verification data).
    Skipped,
}

/// The four persisted pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    PreCheck,
    ApplyConfig,
    PostCheck,
    ResultDiff,
}

/// Per-stage status block carried on every rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatuses {
    pub pre_check: StageStatus,
    pub apply_config: StageStatus,
    pub post_check: StageStatus,
    pub result_diff: StageStatus,
}

impl Default for StageStatuses {
    fn default() -> Self {
        Self {
            pre_check: StageStatus::NotExecuted,
            apply_config: StageStatus::NotExecuted,
            post_check: StageStatus::NotExecuted,
            result_diff: StageStatus::NotExecuted,
        }
    }
}

impl StageStatuses {
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::PreCheck => self.pre_check,
            Stage::ApplyConfig => self.apply_config,
            Stage::PostCheck => self.post_check,
            Stage::ResultDiff => self.result_diff,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::PreCheck => self.pre_check = status,
            Stage::ApplyConfig => self.apply_config = status,
            Stage::PostCheck => self.post_check = status,
            Stage::ResultDiff => self.result_diff = status,
        }
    }
}

/// Checks run before any configuration is touched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreVerification {
    /// Back up running configs before the checks.
    pub backup_configs: bool,
    pub check_commands: Vec<String>,
}

/// The configuration payload pushed during the apply stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplySettings {
    /// Configuration lines pushed to each target device.
    pub device_config: Vec<String>,
    /// Gate the launch behind a simulation run of the config.
    pub simulation_required: bool,
    pub reboot_devices: bool,
}

/// Checks and pass criteria evaluated after the configuration is applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostVerification {
    pub check_commands: Vec<String>,
    pub criteria: Vec<PassCriterion>,
}

/// One pass/fail rule applied to post-check command output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassCriterion {
    pub pattern: String,
    pub condition: CriterionCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriterionCondition {
    Contains,
    NotContains,
}
