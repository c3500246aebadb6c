//! Stage executor seams
//!
//! Each pipeline stage calls out to exactly one executor. Executors return
//! `Ok` on success and an error carrying the diagnostic message on failure;
//! they never touch the rollout store. Production implementations live in
//! [`crate::launch::gateway`]; tests inject scripted doubles.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use switchyard_core::domain::rollout::{
    CriterionCondition, PassCriterion, PostVerification, Rollout,
};

/// Output of one verification command on one device
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub device: String,
    pub command: String,
    pub output: String,
}

/// Everything the post-check stage observed, fed into the result diff
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub outputs: Vec<CommandOutput>,
}

#[async_trait]
pub trait PreCheckRunner: Send + Sync {
    /// Runs the pre-stage verification commands (and config backup, if
    /// requested) against the rollout's target devices.
    async fn run_pre_check(&self, rollout: &Rollout) -> Result<()>;
}

#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Pushes the rollout's configuration lines to the target devices.
    async fn apply_config(&self, rollout: &Rollout) -> Result<()>;
}

#[async_trait]
pub trait PostCheckRunner: Send + Sync {
    /// Runs the post-stage verification commands and returns the captured
    /// per-device output for the result diff.
    async fn run_post_check(
        &self,
        rollout: &Rollout,
        verification: &PostVerification,
    ) -> Result<CheckReport>;
}

#[async_trait]
pub trait DiffEvaluator: Send + Sync {
    /// Judges the post-check report against the determination criteria.
    async fn evaluate(&self, report: &CheckReport, criteria: &[PassCriterion]) -> Result<()>;
}

#[async_trait]
pub trait SimulationEvaluator: Send + Sync {
    /// Dry-runs the configuration lines before any stage is allowed to run.
    async fn simulate(&self, config_lines: &[String]) -> Result<()>;
}

/// The full executor set injected into the launch pipeline
#[derive(Clone)]
pub struct StageExecutors {
    pub pre_check: Arc<dyn PreCheckRunner>,
    pub applier: Arc<dyn ConfigApplier>,
    pub post_check: Arc<dyn PostCheckRunner>,
    pub diff: Arc<dyn DiffEvaluator>,
    pub simulation: Arc<dyn SimulationEvaluator>,
}

/// Result-diff evaluation as pure criteria matching over captured output
///
/// Every captured output must satisfy every criterion; the first violation
/// fails the stage with a message naming the criterion, command, and device.
pub struct CriteriaDiffEvaluator;

#[async_trait]
impl DiffEvaluator for CriteriaDiffEvaluator {
    async fn evaluate(&self, report: &CheckReport, criteria: &[PassCriterion]) -> Result<()> {
        for criterion in criteria {
            for output in &report.outputs {
                let found = output.output.contains(&criterion.pattern);
                let satisfied = match criterion.condition {
                    CriterionCondition::Contains => found,
                    CriterionCondition::NotContains => !found,
                };
                if !satisfied {
                    anyhow::bail!(
                        "criterion '{}' ({:?}) violated by output of '{}' on {}",
                        criterion.pattern,
                        criterion.condition,
                        output.command,
                        output.device
                    );
                }
            }
        }
        Ok(())
    }
}
