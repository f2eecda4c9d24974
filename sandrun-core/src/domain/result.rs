//! Execution result types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::outcome::{TestCounts, TestOutcome};
use crate::domain::request::ExecutionRequest;

/// Execution status
///
/// `Pending` and `Running` only exist while a runner owns the result; every
/// returned result carries one of the four terminal values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    /// Test runner exited 0
    Succeeded,
    /// Test runner ran and reported failures
    Failed,
    /// Deadline elapsed; counts are not trustworthy
    Timeout,
    /// Infrastructure problem; the tests never meaningfully ran
    Error,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Error
        )
    }

    /// Whether the whole job is worth resubmitting
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionStatus::Error | ExecutionStatus::Timeout)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where the counts on a result came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// No strategy produced anything
    #[default]
    None,
    /// Structured report printed on standard output
    Stdout,
    /// Structured report at the known result path
    ResultFile,
    /// Structured report at a conventional fallback path
    AlternateFile,
    /// Structured report uploaded by the sandbox to the artifact store
    UploadedArtifact,
    /// Summary lines scraped from log text
    LogScrape,
}

impl ResultSource {
    /// Counts came from a structured report
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            ResultSource::Stdout
                | ResultSource::ResultFile
                | ResultSource::AlternateFile
                | ResultSource::UploadedArtifact
        )
    }
}

/// Accumulated result of one execution job
///
/// Owned and mutated by exactly one runner; immutable once returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub tenant_id: String,

    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub duration: Duration,

    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub flaky: u32,
    pub outcomes: Vec<TestOutcome>,
    pub result_source: ResultSource,

    pub results_uri: Option<String>,
    pub artifacts_uri: Option<String>,
    pub screenshots_uri: Option<String>,
    pub videos_uri: Option<String>,
    pub traces_uri: Option<String>,
    pub logs_uri: Option<String>,

    pub logs: String,
    /// Native structured report, when one was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_results: Option<Vec<u8>>,

    pub error: Option<String>,
    pub error_details: Option<String>,
}

impl ExecutionResult {
    /// Zero-state result for a request
    pub fn new(request: &ExecutionRequest) -> Self {
        Self {
            run_id: request.run_id.clone(),
            tenant_id: request.tenant_id.clone(),
            ..Default::default()
        }
    }

    /// Replaces the counts, keeping `total = passed + failed + skipped`
    pub fn apply_counts(&mut self, counts: TestCounts) {
        self.passed = counts.passed;
        self.failed = counts.failed;
        self.skipped = counts.skipped;
        self.flaky = counts.flaky;
        self.total_tests = counts.total();
    }

    pub fn counts(&self) -> TestCounts {
        TestCounts {
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            flaky: self.flaky,
        }
    }

    /// Marks the result terminal with an error message
    pub fn fail(&mut self, status: ExecutionStatus, error: impl Into<String>) {
        self.status = status;
        self.error = Some(error.into());
    }

    /// Percentage of passed tests, 0 when nothing ran
    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.total_tests) * 100.0
        }
    }

    /// Counts were reconstructed heuristically or not at all
    ///
    /// Reports should caveat the numbers when this is set.
    pub fn is_degraded(&self) -> bool {
        !self.result_source.is_structured()
    }
}
