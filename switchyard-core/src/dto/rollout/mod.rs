//! Rollout DTOs for the HTTP surface

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::rollout::{
    ApplySettings, LaunchStatus, PostVerification, PreVerification, Rollout,
};

/// Request to create a new rollout
///
/// A freshly created rollout always starts at `NotScheduled` with untouched
/// stage statuses; the scheduler picks it up once `scheduled_at` is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRollout {
    pub name: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_by: Option<String>,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub target_devices: Vec<String>,
    pub pre_verification: Option<PreVerification>,
    pub apply_settings: ApplySettings,
    pub post_verification: Option<PostVerification>,
}

/// Request to replace an existing rollout's definition
///
/// Replacing the definition resets the launch state: status returns to
/// `NotScheduled`, stage statuses to `NotExecuted`, and the executed marker
/// is cleared.
pub type UpdateRollout = CreateRollout;

/// List-view projection of a rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_by: Option<String>,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub launch_status: LaunchStatus,
    pub executed: bool,
}

impl From<&Rollout> for RolloutSummary {
    fn from(rollout: &Rollout) -> Self {
        Self {
            id: rollout.id,
            name: rollout.name.clone(),
            description: rollout.description.clone(),
            contact_email: rollout.contact_email.clone(),
            created_by: rollout.created_by.clone(),
            scheduled_at: rollout.scheduled_at,
            launch_status: rollout.launch_status,
            executed: rollout.executed,
        }
    }
}
