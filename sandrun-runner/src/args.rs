//! Test runner invocation
//!
//! Both sandboxes run the same command line; the cluster sandbox renders it
//! into a shell script, so everything here is plain argv plus a quoting
//! helper.

use sandrun_core::domain::request::ExecutionRequest;

/// Structured report path, relative to the bundle root
pub const RESULT_FILE: &str = "test-results/results.json";

/// Fallback report locations, relative to the bundle root, in lookup order
pub const ALTERNATE_RESULT_FILES: [&str; 2] = ["results.json", "playwright-report/results.json"];

/// Directories excluded when copying a bundle and collected after a run
pub const REPORT_DIRS: [&str; 3] = ["test-results", "playwright-report", "reports"];

/// Arguments following `npx`
///
/// `reporter` is passed through to `--reporter` (e.g. `json` or `json,list`).
pub fn test_args(request: &ExecutionRequest, reporter: &str) -> Vec<String> {
    let mut args = vec![
        "playwright".to_string(),
        "test".to_string(),
        format!("--reporter={}", reporter),
        format!("--project={}", request.browser),
        format!("--workers={}", request.effective_workers()),
    ];

    if let Some(grep) = grep_expression(request) {
        args.push(format!("--grep={}", grep));
    }

    if request.retries > 0 {
        args.push(format!("--retries={}", request.retries));
    }

    args.extend(request.test_files.iter().cloned());
    args
}

/// Single `--grep` value for the tag filter and the name pattern
///
/// With both set, a test must match both.
fn grep_expression(request: &ExecutionRequest) -> Option<String> {
    let filter = request.test_filter.as_deref().filter(|s| !s.is_empty());
    let pattern = request.grep_pattern.as_deref().filter(|s| !s.is_empty());

    match (filter, pattern) {
        (Some(f), Some(p)) => Some(format!("^(?=.*{})(?=.*{})", f, p)),
        (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
        (None, None) => None,
    }
}

/// Quotes a word for POSIX `sh`
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Renders argv as a single shell command line
pub fn shell_join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
