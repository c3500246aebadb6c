//! Test doubles shared by the scheduler and pipeline tests
//!
//! `MemoryStore` mirrors the semantics of the PostgreSQL store (including
//! the conditional swap and the `last_updated` side effect) over a mutex-held
//! map, and `ScriptedExecutors` stands in for the device gateway with
//! per-stage failure switches and concurrency instrumentation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use switchyard_core::domain::log::{LogLevel, RolloutLogEntry};
use switchyard_core::domain::rollout::{
    ApplySettings, CriterionCondition, LaunchStatus, PassCriterion, PostVerification,
    PreVerification, Rollout, Stage, StageStatus, StageStatuses,
};

use crate::launch::executor::{
    CheckReport, CommandOutput, ConfigApplier, DiffEvaluator, PostCheckRunner, PreCheckRunner,
    SimulationEvaluator, StageExecutors,
};
use crate::store::RolloutStore;

// =============================================================================
// Rollout builders
// =============================================================================

/// A fully populated rollout with the given schedule and status.
pub fn rollout_with_schedule(
    scheduled_at: Option<DateTime<Utc>>,
    status: LaunchStatus,
) -> Rollout {
    Rollout {
        id: Uuid::new_v4(),
        name: "core uplink migration".to_string(),
        description: Some("move uplinks to the new spine".to_string()),
        contact_email: Some("noc@example.net".to_string()),
        created_by: Some("noc".to_string()),
        scheduled_at,
        launch_status: status,
        last_updated: Utc::now(),
        stages: StageStatuses::default(),
        target_devices: vec!["sw-access-01".to_string(), "sw-access-02".to_string()],
        pre_verification: Some(PreVerification {
            backup_configs: true,
            check_commands: vec!["show interfaces status".to_string()],
        }),
        apply_settings: ApplySettings {
            device_config: vec![
                "interface Gi0/1".to_string(),
                "switchport trunk allowed vlan 100,200".to_string(),
            ],
            simulation_required: false,
            reboot_devices: false,
        },
        post_verification: Some(PostVerification {
            check_commands: vec!["show interfaces status".to_string()],
            criteria: vec![PassCriterion {
                pattern: "connected".to_string(),
                condition: CriterionCondition::Contains,
            }],
        }),
        executed: false,
        executed_time: None,
    }
}

/// A rollout that became due one second ago.
pub fn rollout_due_now(status: LaunchStatus) -> Rollout {
    rollout_with_schedule(Some(Utc::now() - chrono::Duration::seconds(1)), status)
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    rollouts: Mutex<HashMap<Uuid, Rollout>>,
    logs: Mutex<HashMap<Uuid, Vec<RolloutLogEntry>>>,
    fail_next_query: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, rollout: Rollout) {
        self.rollouts.lock().unwrap().insert(rollout.id, rollout);
    }

    pub fn delete(&self, id: Uuid) {
        self.rollouts.lock().unwrap().remove(&id);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Rollout> {
        self.rollouts.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Rollout> {
        self.rollouts.lock().unwrap().values().cloned().collect()
    }

    pub fn logs_of(&self, id: Uuid) -> Vec<RolloutLogEntry> {
        self.logs.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    /// Overwrite a rollout's status as an external actor would.
    pub fn force_status(&self, id: Uuid, status: LaunchStatus) {
        if let Some(rollout) = self.rollouts.lock().unwrap().get_mut(&id) {
            rollout.launch_status = status;
            rollout.last_updated = Utc::now();
        }
    }

    /// Age a rollout's `last_updated` by the given amount.
    pub fn backdate_last_updated(&self, id: Uuid, by: chrono::Duration) {
        if let Some(rollout) = self.rollouts.lock().unwrap().get_mut(&id) {
            rollout.last_updated = rollout.last_updated - by;
        }
    }

    /// Make the next scheduler query return an error.
    pub fn fail_next_query(&self) {
        self.fail_next_query.store(true, Ordering::SeqCst);
    }

    fn check_query_failure(&self) -> Result<()> {
        if self.fail_next_query.swap(false, Ordering::SeqCst) {
            anyhow::bail!("store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl RolloutStore for MemoryStore {
    async fn find_due_not_terminal(&self, now: DateTime<Utc>) -> Result<Vec<Rollout>> {
        self.check_query_failure()?;
        let mut due: Vec<Rollout> = self
            .rollouts
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.scheduled_at.is_some_and(|at| at <= now) && !r.is_terminal())
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn find_due_unqueued(
        &self,
        now: DateTime<Utc>,
        excluded: &[Uuid],
    ) -> Result<Vec<Rollout>> {
        self.check_query_failure()?;
        let mut due: Vec<Rollout> = self
            .rollouts
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.scheduled_at.is_some_and(|at| at <= now)
                    && r.launch_status == LaunchStatus::NotScheduled
                    && !excluded.contains(&r.id)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn find_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Rollout>> {
        self.check_query_failure()?;
        Ok(self
            .rollouts
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.launch_status == LaunchStatus::Queued && r.last_updated < older_than)
            .cloned()
            .collect())
    }

    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: LaunchStatus,
        new: LaunchStatus,
    ) -> Result<u64> {
        let mut rollouts = self.rollouts.lock().unwrap();
        match rollouts.get_mut(&id) {
            Some(rollout) if rollout.launch_status == expected => {
                rollout.launch_status = new;
                rollout.last_updated = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_status(&self, id: Uuid, new: LaunchStatus) -> Result<()> {
        if let Some(rollout) = self.rollouts.lock().unwrap().get_mut(&id) {
            rollout.launch_status = new;
            rollout.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn set_stage_status(&self, id: Uuid, stage: Stage, status: StageStatus) -> Result<()> {
        if let Some(rollout) = self.rollouts.lock().unwrap().get_mut(&id) {
            rollout.stages.set(stage, status);
            rollout.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn mark_executed(&self, id: Uuid, time: DateTime<Utc>) -> Result<()> {
        if let Some(rollout) = self.rollouts.lock().unwrap().get_mut(&id) {
            rollout.executed = true;
            rollout.executed_time = Some(time);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Rollout>> {
        Ok(self.snapshot(id))
    }

    async fn clear_log(&self, id: Uuid) -> Result<()> {
        self.logs.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn append_log(&self, id: Uuid, level: LogLevel, message: String) -> Result<()> {
        self.logs.lock().unwrap().entry(id).or_default().push(RolloutLogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
        Ok(())
    }
}

// =============================================================================
// Scripted executors
// =============================================================================

/// Stage executors with per-stage failure switches and instrumentation
#[derive(Default)]
pub struct ScriptedExecutors {
    fail_pre_check: bool,
    fail_apply: bool,
    fail_post_check: bool,
    fail_diff: bool,
    fail_simulation: bool,
    stage_delay: Option<Duration>,
    pre_check_runs: AtomicUsize,
    apply_runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    launch_order: Mutex<Vec<Uuid>>,
}

impl ScriptedExecutors {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with_failing_pre_check(mut self) -> Self {
        self.fail_pre_check = true;
        self
    }

    pub fn with_failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    pub fn with_failing_post_check(mut self) -> Self {
        self.fail_post_check = true;
        self
    }

    pub fn with_failing_diff(mut self) -> Self {
        self.fail_diff = true;
        self
    }

    pub fn with_failing_simulation(mut self) -> Self {
        self.fail_simulation = true;
        self
    }

    /// Sleep inside every stage call, opening a window for overlap.
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = Some(delay);
        self
    }

    /// Wire this double into every executor seam.
    pub fn bundle(self: Arc<Self>) -> StageExecutors {
        StageExecutors {
            pre_check: self.clone(),
            applier: self.clone(),
            post_check: self.clone(),
            diff: self.clone(),
            simulation: self,
        }
    }

    pub fn pre_check_runs(&self) -> usize {
        self.pre_check_runs.load(Ordering::SeqCst)
    }

    pub fn apply_runs(&self) -> usize {
        self.apply_runs.load(Ordering::SeqCst)
    }

    /// Highest number of stage calls ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Rollout ids in the order their pre-check stage started.
    pub fn launch_order(&self) -> Vec<Uuid> {
        self.launch_order.lock().unwrap().clone()
    }

    async fn enter_stage(&self) -> StageGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.stage_delay {
            tokio::time::sleep(delay).await;
        }
        StageGuard { owner: self }
    }
}

struct StageGuard<'a> {
    owner: &'a ScriptedExecutors,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PreCheckRunner for ScriptedExecutors {
    async fn run_pre_check(&self, rollout: &Rollout) -> Result<()> {
        let _guard = self.enter_stage().await;
        self.pre_check_runs.fetch_add(1, Ordering::SeqCst);
        self.launch_order.lock().unwrap().push(rollout.id);
        if self.fail_pre_check {
            anyhow::bail!("service check reported degraded state");
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigApplier for ScriptedExecutors {
    async fn apply_config(&self, _rollout: &Rollout) -> Result<()> {
        let _guard = self.enter_stage().await;
        self.apply_runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_apply {
            anyhow::bail!("device rejected configuration");
        }
        Ok(())
    }
}

#[async_trait]
impl PostCheckRunner for ScriptedExecutors {
    async fn run_post_check(
        &self,
        rollout: &Rollout,
        verification: &PostVerification,
    ) -> Result<CheckReport> {
        let _guard = self.enter_stage().await;
        if self.fail_post_check {
            anyhow::bail!("post-check command timed out");
        }
        Ok(CheckReport {
            outputs: verification
                .check_commands
                .iter()
                .flat_map(|command| {
                    rollout.target_devices.iter().map(move |device| CommandOutput {
                        device: device.clone(),
                        command: command.clone(),
                        output: "connected".to_string(),
                    })
                })
                .collect(),
        })
    }
}

#[async_trait]
impl DiffEvaluator for ScriptedExecutors {
    async fn evaluate(&self, _report: &CheckReport, _criteria: &[PassCriterion]) -> Result<()> {
        let _guard = self.enter_stage().await;
        if self.fail_diff {
            anyhow::bail!("determination criteria not met");
        }
        Ok(())
    }
}

#[async_trait]
impl SimulationEvaluator for ScriptedExecutors {
    async fn simulate(&self, _config_lines: &[String]) -> Result<()> {
        let _guard = self.enter_stage().await;
        if self.fail_simulation {
            anyhow::bail!("simulation rejected the configuration");
        }
        Ok(())
    }
}
