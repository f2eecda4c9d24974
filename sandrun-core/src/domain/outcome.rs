//! Normalized per-test outcomes

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical test status
///
/// Runner-native statuses map many-to-one onto the three canonical values.
/// Values outside the table are kept verbatim in [`TestStatus::Other`] so the
/// outcome list still reconciles against the native report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Other(String),
}

impl TestStatus {
    /// Maps a runner-native status
    pub fn from_native(status: &str) -> Self {
        match status {
            "passed" | "expected" | "flaky" => TestStatus::Passed,
            "failed" | "unexpected" | "timedOut" => TestStatus::Failed,
            "skipped" => TestStatus::Skipped,
            other => TestStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Other(s) => s,
        }
    }
}

impl From<String> for TestStatus {
    fn from(value: String) -> Self {
        TestStatus::from_native(&value)
    }
}

impl From<TestStatus> for String {
    fn from(status: TestStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Stable identifier: file, title path and browser project
    pub id: String,
    pub title: String,
    pub file: Option<String>,
    pub project: Option<String>,
    pub status: TestStatus,
    /// Duration of the final attempt
    pub duration: Duration,
    pub error: Option<String>,
    /// Number of attempts the runner made
    pub attempts: u32,
    /// Passed only after at least one failed attempt
    pub flaky: bool,
}

/// Aggregate counts
///
/// `flaky` is informational: flaky tests are also counted in `passed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub flaky: u32,
}

impl TestCounts {
    pub fn new(passed: u32, failed: u32, skipped: u32) -> Self {
        Self {
            passed,
            failed,
            skipped,
            flaky: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Tallies outcomes; statuses outside the canonical three are not counted
    pub fn from_outcomes(outcomes: &[TestOutcome]) -> Self {
        let mut counts = TestCounts::default();
        for outcome in outcomes {
            match outcome.status {
                TestStatus::Passed => counts.passed += 1,
                TestStatus::Failed => counts.failed += 1,
                TestStatus::Skipped => counts.skipped += 1,
                TestStatus::Other(_) => {}
            }
            if outcome.flaky {
                counts.flaky += 1;
            }
        }
        counts
    }
}

impl std::ops::AddAssign for TestCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.passed += rhs.passed;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
        self.flaky += rhs.flaky;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: TestStatus, flaky: bool) -> TestOutcome {
        TestOutcome {
            id: "t".to_string(),
            title: "t".to_string(),
            file: None,
            project: None,
            status,
            duration: Duration::ZERO,
            error: None,
            attempts: 1,
            flaky,
        }
    }

    #[test]
    fn test_status_mapping_table() {
        assert_eq!(TestStatus::from_native("expected"), TestStatus::Passed);
        assert_eq!(TestStatus::from_native("passed"), TestStatus::Passed);
        assert_eq!(TestStatus::from_native("unexpected"), TestStatus::Failed);
        assert_eq!(TestStatus::from_native("timedOut"), TestStatus::Failed);
        assert_eq!(TestStatus::from_native("failed"), TestStatus::Failed);
        assert_eq!(TestStatus::from_native("skipped"), TestStatus::Skipped);
        assert_eq!(
            TestStatus::from_native("interrupted"),
            TestStatus::Other("interrupted".to_string())
        );
    }

    #[test]
    fn test_counts_from_outcomes() {
        let outcomes = vec![
            outcome(TestStatus::Passed, false),
            outcome(TestStatus::Passed, true),
            outcome(TestStatus::Failed, false),
            outcome(TestStatus::Skipped, false),
            outcome(TestStatus::Other("interrupted".to_string()), false),
        ];

        let counts = TestCounts::from_outcomes(&outcomes);
        assert_eq!(counts.passed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.flaky, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        let json = serde_json::to_string(&TestStatus::Other("interrupted".to_string())).unwrap();
        assert_eq!(json, "\"interrupted\"");
        let status: TestStatus = serde_json::from_str("\"unexpected\"").unwrap();
        assert_eq!(status, TestStatus::Failed);
    }
}
