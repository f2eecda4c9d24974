//! Result normalization
//!
//! Turns whatever the test runner left behind into canonical outcomes and
//! counts. [`normalize`] is pure; [`extract`] decides which raw payload to
//! feed it.

pub mod extract;
pub mod report;
pub mod scrape;

use sandrun_core::domain::outcome::{TestCounts, TestOutcome, TestStatus};
use std::time::Duration;
use thiserror::Error;

use crate::normalize::report::{Report, Suite, Test};

pub use extract::{Extracted, extract};

/// Recorded when a run left nothing to count
pub const NO_RESULTS_MESSAGE: &str = "no test results found; see logs";

/// Format of a raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Playwright JSON reporter output
    PlaywrightJson,
    /// Human-readable runner output with summary lines
    SummaryText,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed report: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no test summary found")]
    NoSummary,
}

/// Canonical view of one run's results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub outcomes: Vec<TestOutcome>,
    pub counts: TestCounts,
}

/// Normalizes a raw payload
pub fn normalize(raw: &[u8], format: ReportFormat) -> Result<Normalized, NormalizeError> {
    match format {
        ReportFormat::PlaywrightJson => {
            let report: Report = serde_json::from_slice(raw)?;
            Ok(normalize_report(&report))
        }
        ReportFormat::SummaryText => {
            let text = String::from_utf8_lossy(raw);
            let counts = scrape::scrape_summary(&text).ok_or(NormalizeError::NoSummary)?;
            Ok(Normalized {
                outcomes: Vec::new(),
                counts,
            })
        }
    }
}

fn normalize_report(report: &Report) -> Normalized {
    let mut outcomes = Vec::new();
    for suite in &report.suites {
        collect_suite(suite, &[], None, &mut outcomes);
    }

    // Reports without a test tree still carry totals
    let counts = match (&report.stats, outcomes.is_empty()) {
        (Some(stats), true) => TestCounts {
            passed: stats.expected + stats.flaky,
            failed: stats.unexpected,
            skipped: stats.skipped,
            flaky: stats.flaky,
        },
        _ => TestCounts::from_outcomes(&outcomes),
    };

    Normalized { outcomes, counts }
}

/// Walks a suite tree depth-first
///
/// Top-level suites are files; their title is not part of the test title.
fn collect_suite(
    suite: &Suite,
    titles: &[String],
    file: Option<&str>,
    outcomes: &mut Vec<TestOutcome>,
) {
    let is_file_suite = file.is_none();
    let file = suite.file.as_deref().or(file).or(if is_file_suite {
        Some(suite.title.as_str())
    } else {
        None
    });

    let mut path = titles.to_vec();
    if !is_file_suite && !suite.title.is_empty() {
        path.push(suite.title.clone());
    }

    for spec in &suite.specs {
        let mut spec_path = path.clone();
        spec_path.push(spec.title.clone());
        let title = spec_path.join(" > ");
        let spec_file = spec.file.as_deref().or(file);

        for test in &spec.tests {
            outcomes.push(test_outcome(test, &title, spec_file, spec.id.as_deref()));
        }
    }

    for child in &suite.suites {
        collect_suite(child, &path, file, outcomes);
    }
}

fn test_outcome(test: &Test, title: &str, file: Option<&str>, spec_id: Option<&str>) -> TestOutcome {
    let last = test.results.last();

    let native = last
        .and_then(|a| a.status.as_deref())
        .or(test.status.as_deref())
        .unwrap_or("unknown");
    let status = TestStatus::from_native(native);

    let retried_to_pass = status == TestStatus::Passed
        && test.results.len() > 1
        && test.results[..test.results.len() - 1]
            .iter()
            .any(|a| a.status.as_deref() != Some("passed"));
    let flaky = retried_to_pass || test.status.as_deref() == Some("flaky");

    let millis = last
        .and_then(|a| a.duration)
        .or(test.duration)
        .unwrap_or(0.0);

    let error = match status {
        TestStatus::Passed | TestStatus::Skipped => None,
        _ => last
            .and_then(|a| a.error_message())
            .or_else(|| test.error.as_ref().and_then(|e| e.message.clone())),
    };

    let project = test.project_name.clone().filter(|p| !p.is_empty());
    let id = match (spec_id, &project) {
        (Some(id), Some(p)) => format!("{}-{}", id, p),
        (Some(id), None) => id.to_string(),
        (None, _) => {
            let mut id = format!("{} > {}", file.unwrap_or("<unknown>"), title);
            if let Some(p) = &project {
                id.push_str(&format!(" [{}]", p));
            }
            id
        }
    };

    TestOutcome {
        id,
        title: title.to_string(),
        file: file.map(str::to_string),
        project,
        status,
        duration: Duration::from_secs_f64(millis.max(0.0) / 1000.0),
        error,
        attempts: test.results.len().max(1) as u32,
        flaky,
    }
}
