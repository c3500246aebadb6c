//! Rollout scheduler
//!
//! The process-wide scheduling engine. Admission always goes through a
//! conditional status swap in the store, so a concurrent writer winning the
//! race results in a skipped rollout rather than a double run. Dispatch is
//! guarded by a single atomic flag: triggers that lose the compare-exchange
//! return immediately, and the winner keeps draining the queue until it is
//! empty, so no admitted rollout waits for the next poll tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use switchyard_core::domain::rollout::LaunchStatus;

use crate::config::SchedulerConfig;
use crate::launch::LaunchPipeline;
use crate::scheduler::queue::ExecutionQueue;
use crate::store::RolloutStore;

pub struct RolloutScheduler {
    store: Arc<dyn RolloutStore>,
    pipeline: Arc<LaunchPipeline>,
    queue: Mutex<ExecutionQueue>,
    executing: AtomicBool,
    config: SchedulerConfig,
}

impl RolloutScheduler {
    pub fn new(
        store: Arc<dyn RolloutStore>,
        pipeline: Arc<LaunchPipeline>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            queue: Mutex::new(ExecutionQueue::new()),
            executing: AtomicBool::new(false),
            config,
        }
    }

    /// Runs once at process start, before any polling.
    ///
    /// Every due rollout that is not yet terminal is forced back to `Queued`
    /// and re-admitted, including rollouts that were `InProgress` when the
    /// process died: an interrupted launch is always restarted from the first
    /// stage, never resumed mid-stage. Rollouts without a schedule are never
    /// admitted.
    pub async fn recover_from_crash(&self) -> Result<()> {
        self.rebuild_queue().await?;
        self.process_queue().await;
        Ok(())
    }

    /// The admission half of crash recovery: reset in-memory state and
    /// re-admit every due non-terminal rollout from the store.
    async fn rebuild_queue(&self) -> Result<()> {
        info!("Starting crash recovery");

        self.queue().clear();
        self.executing.store(false, Ordering::SeqCst);

        let now = Utc::now();
        let candidates = self.store.find_due_not_terminal(now).await?;

        if candidates.is_empty() {
            info!("No rollouts found for crash recovery");
            return Ok(());
        }

        info!("Found {} rollout(s) for crash recovery", candidates.len());

        let mut recovered = 0usize;
        for rollout in candidates {
            let Some(scheduled_at) = rollout.scheduled_at else {
                debug!("Skipping rollout {} with no schedule", rollout.id);
                continue;
            };

            debug!(
                "Recovering rollout {} (previous status: {:?})",
                rollout.id, rollout.launch_status
            );

            self.store.set_status(rollout.id, LaunchStatus::Queued).await?;
            self.queue().insert(rollout.id, scheduled_at);
            recovered += 1;
        }

        info!(
            "Crash recovery completed: {} rollout(s) reset to Queued",
            recovered
        );

        Ok(())
    }

    /// Periodic admission pass.
    ///
    /// Errors are logged and swallowed; the next tick retries. A failed cycle
    /// never takes the poller down.
    pub async fn refresh_queue(&self) {
        if let Err(e) = self.try_refresh_queue().await {
            error!("Error during queue refresh: {:#}", e);
        }
    }

    async fn try_refresh_queue(&self) -> Result<()> {
        let excluded = self.queue().ids();
        let now = Utc::now();

        let due = self.store.find_due_unqueued(now, &excluded).await?;
        if !due.is_empty() {
            debug!("Found {} new due rollout(s)", due.len());
        }

        for rollout in due {
            let Some(scheduled_at) = rollout.scheduled_at else {
                debug!("Skipping rollout {} with no schedule", rollout.id);
                continue;
            };

            // Only the actor whose swap lands owns the queue entry.
            let updated = self
                .store
                .compare_and_swap_status(rollout.id, LaunchStatus::NotScheduled, LaunchStatus::Queued)
                .await?;

            if updated > 0 && self.queue().insert(rollout.id, scheduled_at) {
                debug!("Queued rollout {}", rollout.id);
            }
        }

        self.process_queue().await;
        Ok(())
    }

    /// Periodic reclamation of rollouts that were claimed but never dispatched.
    ///
    /// A rollout stuck at `Queued` past the timeout (engine restart timing, an
    /// admission race) goes back to `NotScheduled` and becomes eligible again
    /// on the next refresh.
    pub async fn reclaim_stuck(&self) {
        if let Err(e) = self.try_reclaim_stuck().await {
            error!("Error resetting stuck queued rollouts: {:#}", e);
        }
    }

    async fn try_reclaim_stuck(&self) -> Result<()> {
        let threshold = Utc::now() - chrono::Duration::from_std(self.config.queued_timeout)?;
        let stuck = self.store.find_stuck_queued(threshold).await?;

        if stuck.is_empty() {
            return Ok(());
        }

        warn!("Resetting {} stuck queued rollout(s)", stuck.len());

        for rollout in stuck {
            self.queue().remove(&rollout.id);
            let updated = self
                .store
                .compare_and_swap_status(rollout.id, LaunchStatus::Queued, LaunchStatus::NotScheduled)
                .await?;
            if updated > 0 {
                info!("Reset stuck queued rollout {}", rollout.id);
            }
        }

        Ok(())
    }

    /// Keeps the queue consistent with external edits and deletes.
    ///
    /// Called from the CRUD mutation boundary after a rollout is updated or
    /// deleted: if it is gone or no longer `Queued`, it is purged from the
    /// in-memory queue.
    pub async fn on_rollout_changed(&self, id: Uuid) {
        if !self.queue().contains(&id) {
            return;
        }

        match self.store.get(id).await {
            Ok(None) => {
                self.queue().remove(&id);
                debug!("Removed deleted rollout {} from queue", id);
            }
            Ok(Some(current)) if current.launch_status != LaunchStatus::Queued => {
                self.queue().remove(&id);
                debug!("Removed updated rollout {} from queue", id);
            }
            Ok(Some(_)) => {}
            Err(e) => {
                error!("Failed to re-check rollout {} after update: {:#}", id, e);
            }
        }
    }

    /// Drains the execution queue one rollout at a time.
    ///
    /// The atomic flag is the only dispatch gate: a trigger that loses the
    /// compare-exchange returns immediately. The winner releases the gate
    /// after each rollout and re-takes it while the queue is non-empty, so
    /// every admitted rollout is eventually dispatched without waiting for
    /// another trigger.
    pub async fn process_queue(&self) {
        loop {
            if self
                .executing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            self.dispatch_next().await;

            self.executing.store(false, Ordering::SeqCst);

            if self.queue().is_empty() {
                return;
            }
        }
    }

    /// Pops the queue head, re-validates it against the store, and runs the
    /// launch pipeline to completion.
    async fn dispatch_next(&self) {
        let Some(entry) = self.queue().pop() else {
            return;
        };
        let id = entry.rollout_id;

        // Double-check the rollout is still valid to execute: it may have
        // been deleted or touched between admission and now.
        let current = match self.store.get(id).await {
            Ok(current) => current,
            Err(e) => {
                error!("Failed to load rollout {} for dispatch: {:#}", id, e);
                return;
            }
        };

        let Some(current) = current else {
            info!("Rollout {} was deleted, skipping", id);
            return;
        };

        if current.launch_status != LaunchStatus::Queued {
            debug!(
                "Rollout {} status changed to {:?}, skipping",
                id, current.launch_status
            );
            return;
        }

        info!(
            "Starting execution of rollout {} (scheduled at {}, queued at {})",
            id, entry.scheduled_at, entry.queued_at
        );

        match self.pipeline.run(id).await {
            Ok(()) => {
                info!("Finished execution of rollout {}", id);
            }
            Err(e) => {
                error!("Failed to execute rollout {}: {:#}", id, e);
                if let Err(e) = self
                    .store
                    .compare_and_swap_status(id, LaunchStatus::InProgress, LaunchStatus::Fail)
                    .await
                {
                    error!("Failed to record failure for rollout {}: {:#}", id, e);
                }
            }
        }
    }

    /// Spawns the periodic refresh and reclaim loops.
    pub fn start(self: &Arc<Self>) {
        info!(
            "Starting scheduler loops (refresh: {:?}, reclaim: {:?}, queued timeout: {:?})",
            self.config.refresh_interval, self.config.reclaim_interval, self.config.queued_timeout
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(scheduler.config.refresh_interval);
            loop {
                interval.tick().await;
                debug!("Polling for due rollouts");
                scheduler.refresh_queue().await;
            }
        });

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(scheduler.config.reclaim_interval);
            loop {
                interval.tick().await;
                scheduler.reclaim_stuck().await;
            }
        });
    }

    // Monitoring accessors
    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    fn queue(&self) -> MutexGuard<'_, ExecutionQueue> {
        // Queue operations never panic, so the lock cannot be poisoned.
        self.queue.lock().expect("execution queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryStore, ScriptedExecutors, rollout_due_now, rollout_with_schedule};
    use std::time::Duration;

    fn scheduler_with(
        store: &Arc<MemoryStore>,
        executors: &Arc<ScriptedExecutors>,
    ) -> Arc<RolloutScheduler> {
        let pipeline = Arc::new(LaunchPipeline::new(
            store.clone() as Arc<dyn RolloutStore>,
            executors.clone().bundle(),
        ));
        Arc::new(RolloutScheduler::new(
            store.clone() as Arc<dyn RolloutStore>,
            pipeline,
            SchedulerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_refresh_admits_and_runs_due_rollout() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.refresh_queue().await;

        let final_state = store.snapshot(id).unwrap();
        assert_eq!(final_state.launch_status, LaunchStatus::Success);
        assert!(final_state.executed);
        assert_eq!(executors.pre_check_runs(), 1);
        assert_eq!(scheduler.queue_len(), 0);
        assert!(!scheduler.is_executing());
    }

    #[tokio::test]
    async fn test_rollout_without_schedule_is_never_admitted() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_with_schedule(None, LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.refresh_queue().await;
        scheduler.recover_from_crash().await.unwrap();

        let final_state = store.snapshot(id).unwrap();
        assert_eq!(final_state.launch_status, LaunchStatus::NotScheduled);
        assert_eq!(executors.pre_check_runs(), 0);
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_future_schedule_is_not_admitted_yet() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_with_schedule(
            Some(Utc::now() + chrono::Duration::hours(1)),
            LaunchStatus::NotScheduled,
        );
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.refresh_queue().await;

        assert_eq!(
            store.snapshot(id).unwrap().launch_status,
            LaunchStatus::NotScheduled
        );
        assert_eq!(executors.pre_check_runs(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_admits_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        tokio::join!(
            scheduler.refresh_queue(),
            scheduler.refresh_queue(),
            scheduler.refresh_queue()
        );

        let final_state = store.snapshot(id).unwrap();
        assert_eq!(final_state.launch_status, LaunchStatus::Success);
        assert_eq!(executors.pre_check_runs(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_is_serialized_across_triggers() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(
            ScriptedExecutors::passing().with_stage_delay(Duration::from_millis(20)),
        );
        for _ in 0..3 {
            store.put(rollout_due_now(LaunchStatus::NotScheduled));
        }

        let scheduler = scheduler_with(&store, &executors);
        tokio::join!(
            scheduler.refresh_queue(),
            scheduler.refresh_queue(),
            scheduler.process_queue(),
            scheduler.process_queue()
        );

        assert_eq!(executors.pre_check_runs(), 3);
        assert_eq!(executors.max_in_flight(), 1);
        for rollout in store.all() {
            assert_eq!(rollout.launch_status, LaunchStatus::Success);
        }
    }

    #[tokio::test]
    async fn test_queue_drains_in_schedule_order() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let now = Utc::now();
        let late = rollout_with_schedule(
            Some(now - chrono::Duration::seconds(10)),
            LaunchStatus::NotScheduled,
        );
        let early = rollout_with_schedule(
            Some(now - chrono::Duration::seconds(60)),
            LaunchStatus::NotScheduled,
        );
        let late_id = late.id;
        let early_id = early.id;
        store.put(late);
        store.put(early);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.refresh_queue().await;

        let order = executors.launch_order();
        assert_eq!(order, vec![early_id, late_id]);
    }

    #[tokio::test]
    async fn test_crash_recovery_requeues_in_progress_rollouts() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let interrupted = rollout_due_now(LaunchStatus::InProgress);
        let id = interrupted.id;
        store.put(interrupted);
        store.put(rollout_due_now(LaunchStatus::Success));

        let scheduler = scheduler_with(&store, &executors);
        scheduler.recover_from_crash().await.unwrap();

        let final_state = store.snapshot(id).unwrap();
        assert_eq!(final_state.launch_status, LaunchStatus::Success);
        assert!(final_state.executed);
        // The already-terminal rollout was left alone.
        assert_eq!(executors.pre_check_runs(), 1);
    }

    #[tokio::test]
    async fn test_crash_recovery_membership_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        store.put(rollout_due_now(LaunchStatus::Queued));
        store.put(rollout_due_now(LaunchStatus::InProgress));

        let scheduler = scheduler_with(&store, &executors);

        scheduler.rebuild_queue().await.unwrap();
        let mut first = scheduler.queue().ids();
        first.sort();

        scheduler.rebuild_queue().await.unwrap();
        let mut second = scheduler.queue().ids();
        second.sort();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(executors.pre_check_runs(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_resets_stuck_queued_rollout() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);

        // Admit while the gate is held so the rollout stays Queued.
        scheduler.executing.store(true, Ordering::SeqCst);
        scheduler.refresh_queue().await;
        assert_eq!(store.snapshot(id).unwrap().launch_status, LaunchStatus::Queued);
        assert_eq!(scheduler.queue_len(), 1);

        // Age the claim past the timeout and reclaim it.
        store.backdate_last_updated(id, chrono::Duration::minutes(20));
        scheduler.reclaim_stuck().await;

        assert_eq!(
            store.snapshot(id).unwrap().launch_status,
            LaunchStatus::NotScheduled
        );
        assert_eq!(scheduler.queue_len(), 0);

        // It becomes eligible again on the next refresh.
        scheduler.executing.store(false, Ordering::SeqCst);
        scheduler.refresh_queue().await;
        assert_eq!(store.snapshot(id).unwrap().launch_status, LaunchStatus::Success);
    }

    #[tokio::test]
    async fn test_fresh_queued_rollout_is_not_reclaimed() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.executing.store(true, Ordering::SeqCst);
        scheduler.refresh_queue().await;

        scheduler.reclaim_stuck().await;

        assert_eq!(store.snapshot(id).unwrap().launch_status, LaunchStatus::Queued);
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_rollout_is_purged_on_change_notification() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.executing.store(true, Ordering::SeqCst);
        scheduler.refresh_queue().await;
        assert_eq!(scheduler.queue_len(), 1);

        store.delete(id);
        scheduler.on_rollout_changed(id).await;

        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_externally_changed_status_is_purged_on_notification() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.executing.store(true, Ordering::SeqCst);
        scheduler.refresh_queue().await;

        store.force_status(id, LaunchStatus::NotScheduled);
        scheduler.on_rollout_changed(id).await;

        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_revalidates_against_the_store() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);
        scheduler.executing.store(true, Ordering::SeqCst);
        scheduler.refresh_queue().await;

        // External actor resets the status after admission; dispatch must
        // skip instead of launching.
        store.force_status(id, LaunchStatus::NotScheduled);
        scheduler.executing.store(false, Ordering::SeqCst);
        scheduler.process_queue().await;

        assert_eq!(executors.pre_check_runs(), 0);
        assert_eq!(
            store.snapshot(id).unwrap().launch_status,
            LaunchStatus::NotScheduled
        );
    }

    #[tokio::test]
    async fn test_refresh_survives_store_errors() {
        let store = Arc::new(MemoryStore::new());
        let executors = Arc::new(ScriptedExecutors::passing());
        let rollout = rollout_due_now(LaunchStatus::NotScheduled);
        let id = rollout.id;
        store.put(rollout);

        let scheduler = scheduler_with(&store, &executors);

        store.fail_next_query();
        scheduler.refresh_queue().await;
        assert_eq!(executors.pre_check_runs(), 0);

        // Next tick retries and succeeds.
        scheduler.refresh_queue().await;
        assert_eq!(store.snapshot(id).unwrap().launch_status, LaunchStatus::Success);
    }
}
