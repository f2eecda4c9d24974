//! Cancellation and deadline racing
//!
//! Every wait inside a job goes through [`race`] so it observes both the
//! caller's token and the job's absolute deadline.

use sandrun_core::domain::result::{ExecutionResult, ExecutionStatus};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Message recorded when the caller cancels a job
pub const CANCELLED_MESSAGE: &str = "execution cancelled";

/// Why a wait ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupted {
    /// Records the interruption as the job's terminal status
    ///
    /// Counts are left untouched; a timed-out job never gets fabricated ones.
    pub fn apply(self, result: &mut ExecutionResult, timeout: Duration) {
        match self {
            Interrupted::Cancelled => result.fail(ExecutionStatus::Error, CANCELLED_MESSAGE),
            Interrupted::DeadlineExceeded => result.fail(
                ExecutionStatus::Timeout,
                format!("execution timed out after {}s", timeout.as_secs()),
            ),
        }
    }
}

/// Awaits `fut` unless the token fires or the deadline passes first
///
/// Cancellation wins ties.
pub async fn race<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
        out = fut => Ok(out),
    }
}
