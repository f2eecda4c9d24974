//! Human-readable result summaries

use colored::*;
use sandrun_core::domain::batch::BatchResult;
use sandrun_core::domain::outcome::TestStatus;
use sandrun_core::domain::result::{ExecutionResult, ExecutionStatus, ResultSource};

/// Print a single run's result
pub fn print_result(result: &ExecutionResult) {
    println!("{}", "Run Result:".bold());
    println!("  Run ID:      {}", result.run_id.cyan());
    println!("  Status:      {}", colorize_status(&result.status));
    println!("  Exit Code:   {}", result.exit_code);
    println!("  Duration:    {:.1}s", result.duration.as_secs_f64());
    println!(
        "  Tests:       {} total, {} passed, {} failed, {} skipped",
        result.total_tests,
        result.passed.to_string().green(),
        result.failed.to_string().red(),
        result.skipped.to_string().dimmed()
    );
    if result.flaky > 0 {
        println!("  Flaky:       {}", result.flaky.to_string().yellow());
    }
    println!("  Pass Rate:   {:.1}%", result.pass_rate());
    println!("  Source:      {:?}", result.result_source);
    if let Some(notice) = source_notice(result) {
        println!("  {}", format!("⚠ {}", notice).yellow());
    }

    let failures: Vec<_> = result
        .outcomes
        .iter()
        .filter(|o| o.status == TestStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!("\n{}", "Failures:".bold());
        for outcome in failures {
            println!("  {} {}", "✗".red(), outcome.title);
            if let Some(error) = &outcome.error {
                let first_line = error.lines().next().unwrap_or_default();
                println!("    {}", first_line.dimmed());
            }
        }
    }

    let uris = [
        ("Logs", &result.logs_uri),
        ("Results", &result.results_uri),
        ("Artifacts", &result.artifacts_uri),
        ("Screenshots", &result.screenshots_uri),
        ("Videos", &result.videos_uri),
        ("Traces", &result.traces_uri),
    ];
    if uris.iter().any(|(_, uri)| uri.is_some()) {
        println!("\n{}", "Artifacts:".bold());
        for (label, uri) in uris {
            if let Some(uri) = uri {
                println!("  {:<12} {}", format!("{}:", label), uri.dimmed());
            }
        }
    }

    if let Some(error) = &result.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
    if let Some(details) = &result.error_details {
        println!("{}", details.dimmed());
    }
}

/// Warning for results that lack structured data
fn source_notice(result: &ExecutionResult) -> Option<&'static str> {
    match result.result_source {
        ResultSource::None => Some("No test results were found; counts are unavailable"),
        _ if result.is_degraded() => {
            Some("Counts come from log text; per-test details are unavailable")
        }
        _ => None,
    }
}

/// Print a batch run's aggregate
pub fn print_batch(run_id: &str, result: &BatchResult) {
    let summary = &result.summary;

    println!(
        "{}",
        format!(
            "Batch run {}: {} batch(es)",
            run_id,
            result.batch_results.len()
        )
        .bold()
    );
    println!();
    for (index, batch) in result.batch_results.iter().enumerate() {
        match batch {
            Some(batch) => println!(
                "  {} Batch {}  {}  {} passed, {} failed, {} skipped",
                "▸".cyan(),
                index,
                colorize_status(&batch.status),
                batch.passed,
                batch.failed,
                batch.skipped
            ),
            None => println!("  {} Batch {}  {}", "▸".cyan(), index, "rejected".red()),
        }
    }

    println!();
    println!(
        "  Tests:       {} total, {} passed, {} failed, {} skipped",
        summary.total_tests,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().dimmed()
    );
    println!("  Pass Rate:   {:.1}%", summary.pass_rate);
    println!("  Duration:    {:.1}s", result.duration.as_secs_f64());

    if result.has_errors() {
        println!("\n{}", "Errors:".bold());
        for error in &result.errors {
            println!("  {} {}", "✗".red(), error.red());
        }
    }
}

/// Colorize run status for display
fn colorize_status(status: &ExecutionStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        ExecutionStatus::Pending => status_str.dimmed(),
        ExecutionStatus::Running => status_str.cyan(),
        ExecutionStatus::Succeeded => status_str.green(),
        ExecutionStatus::Failed => status_str.red(),
        ExecutionStatus::Timeout => status_str.yellow(),
        ExecutionStatus::Error => status_str.red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandrun_core::domain::request::ExecutionRequest;

    #[test]
    fn test_source_notice_separates_missing_from_scraped() {
        let req = ExecutionRequest::new("run-1", "t1", "/x", "http://x");
        let mut result = ExecutionResult::new(&req);
        assert!(source_notice(&result).unwrap().starts_with("No test results"));

        result.result_source = ResultSource::LogScrape;
        assert!(source_notice(&result).unwrap().starts_with("Counts come from log text"));

        result.result_source = ResultSource::ResultFile;
        assert!(source_notice(&result).is_none());
    }
}
