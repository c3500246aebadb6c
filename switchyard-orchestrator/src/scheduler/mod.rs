//! Scheduler layer
//!
//! Discovers due rollouts, keeps them in an ordered in-memory queue, and
//! dispatches them one at a time to the launch pipeline. Admission is driven
//! by persisted state (periodic refresh plus crash recovery); dispatch is a
//! single-flight drain of the queue.

pub mod engine;
pub mod queue;

pub use engine::RolloutScheduler;
