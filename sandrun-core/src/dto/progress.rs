//! Progress heartbeat DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse phase of an in-flight job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Provisioning,
    Executing,
    Completed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Initializing => "initializing",
            Phase::Provisioning => "provisioning",
            Phase::Executing => "executing",
            Phase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Liveness signal for one job
///
/// `progress` is a keep-alive proxy, not a completion estimate: it only
/// reaches 100 with [`Phase::Completed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub run_id: String,
    pub phase: Phase,
    pub progress: u8,
    /// Set while the job runs as part of a batch: (index, total)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<(usize, usize)>,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(run_id: impl Into<String>, phase: Phase, progress: u8) -> Self {
        Self {
            run_id: run_id.into(),
            phase,
            progress: progress.min(100),
            batch: None,
            timestamp: Utc::now(),
        }
    }
}
