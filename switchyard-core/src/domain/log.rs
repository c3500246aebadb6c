//! Launch log domain types

use serde::{Deserialize, Serialize};

/// One line of a rollout's append-only launch log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutLogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
