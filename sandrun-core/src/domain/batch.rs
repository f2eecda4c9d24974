//! Batch aggregation types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::outcome::{TestCounts, TestOutcome};
use crate::domain::result::ExecutionResult;

/// Combined numbers across batches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub flaky: u32,
    /// Sum of the batches' own durations
    pub duration: Duration,
    pub pass_rate: f64,
}

impl RunSummary {
    pub fn from_counts(counts: TestCounts, duration: Duration) -> Self {
        let total = counts.total();
        let pass_rate = if total == 0 {
            0.0
        } else {
            f64::from(counts.passed) / f64::from(total) * 100.0
        };
        Self {
            total_tests: total,
            passed: counts.passed,
            failed: counts.failed,
            skipped: counts.skipped,
            flaky: counts.flaky,
            duration,
            pass_rate,
        }
    }
}

/// Result of running a test set as independent batches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Per-batch results by batch index; `None` when the batch was rejected
    /// before it produced a result
    pub batch_results: Vec<Option<ExecutionResult>>,
    /// Aggregate over the batches that did not error outright
    pub summary: RunSummary,
    /// Concatenated outcomes of the counted batches, in batch order
    pub outcomes: Vec<TestOutcome>,
    /// One entry per batch that errored outright
    pub errors: Vec<String>,
    /// Wall-clock time for the whole batch run
    pub duration: Duration,
}

impl BatchResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
