//! Ordered result extraction
//!
//! Each strategy looks in one place and returns `None` when it finds nothing
//! usable. [`extract`] tries them in order and the first hit wins, so a fresh
//! report on stdout beats a stale file left in the bundle.

use sandrun_core::domain::result::ResultSource;
use std::path::Path;
use tracing::debug;

use crate::args::{ALTERNATE_RESULT_FILES, RESULT_FILE};
use crate::normalize::{Normalized, ReportFormat, normalize};

/// Output of a successful strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub source: ResultSource,
    /// Structured payload, absent for scraped counts
    pub raw: Option<Vec<u8>>,
    pub normalized: Normalized,
}

/// Runs every strategy in order
///
/// `scripts_dir` is the bundle root the runner executed in; `logs` is the
/// combined output used for scraping.
pub fn extract(scripts_dir: &Path, stdout: &str, logs: &str) -> Option<Extracted> {
    from_stdout(stdout)
        .or_else(|| from_result_file(scripts_dir))
        .or_else(|| from_alternate_files(scripts_dir))
        .or_else(|| from_log_scrape(logs))
}

/// Structured report printed on stdout
pub fn from_stdout(stdout: &str) -> Option<Extracted> {
    let trimmed = stdout.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    structured(trimmed.as_bytes().to_vec(), ResultSource::Stdout)
}

/// Report at the path the runner was told to write to
pub fn from_result_file(scripts_dir: &Path) -> Option<Extracted> {
    read_report(&scripts_dir.join(RESULT_FILE), ResultSource::ResultFile)
}

/// Reports at conventional fallback paths
pub fn from_alternate_files(scripts_dir: &Path) -> Option<Extracted> {
    ALTERNATE_RESULT_FILES
        .iter()
        .find_map(|rel| read_report(&scripts_dir.join(rel), ResultSource::AlternateFile))
}

/// Counts scraped from summary lines
pub fn from_log_scrape(logs: &str) -> Option<Extracted> {
    let normalized = normalize(logs.as_bytes(), ReportFormat::SummaryText).ok()?;
    Some(Extracted {
        source: ResultSource::LogScrape,
        raw: None,
        normalized,
    })
}

/// Structured report already in memory (e.g. downloaded from the store)
pub fn from_bytes(raw: Vec<u8>, source: ResultSource) -> Option<Extracted> {
    structured(raw, source)
}

fn read_report(path: &Path, source: ResultSource) -> Option<Extracted> {
    let raw = std::fs::read(path).ok()?;
    debug!("Found report at {}", path.display());
    structured(raw, source)
}

fn structured(raw: Vec<u8>, source: ResultSource) -> Option<Extracted> {
    match normalize(&raw, ReportFormat::PlaywrightJson) {
        Ok(normalized) => Some(Extracted {
            source,
            raw: Some(raw),
            normalized,
        }),
        Err(e) => {
            debug!("Ignoring unparseable report from {:?}: {}", source, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandrun_core::domain::outcome::TestCounts;

    fn report(passed: u32) -> String {
        format!(r#"{{"stats":{{"expected":{},"unexpected":0,"flaky":0,"skipped":0}}}}"#, passed)
    }

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_stdout_preferred_over_stale_result_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), RESULT_FILE, &report(1));

        let got = extract(dir.path(), &report(7), "  1 passed").unwrap();
        assert_eq!(got.source, ResultSource::Stdout);
        assert_eq!(got.normalized.counts.passed, 7);
    }

    #[test]
    fn test_result_file_then_alternates_then_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let logs = "  2 passed\n  1 failed\n";

        let got = extract(dir.path(), "Running 3 tests", logs).unwrap();
        assert_eq!(got.source, ResultSource::LogScrape);
        assert_eq!(got.raw, None);
        assert_eq!(got.normalized.counts, TestCounts::new(2, 1, 0));

        write(dir.path(), "playwright-report/results.json", &report(4));
        let got = extract(dir.path(), "", logs).unwrap();
        assert_eq!(got.source, ResultSource::AlternateFile);
        assert_eq!(got.normalized.counts.passed, 4);

        write(dir.path(), RESULT_FILE, &report(5));
        let got = extract(dir.path(), "", logs).unwrap();
        assert_eq!(got.source, ResultSource::ResultFile);
        assert!(got.raw.is_some());
    }

    #[test]
    fn test_unparseable_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), RESULT_FILE, "{truncated");
        write(dir.path(), "results.json", &report(3));

        let got = extract(dir.path(), "{also broken", "").unwrap();
        assert_eq!(got.source, ResultSource::AlternateFile);
        assert_eq!(got.normalized.counts.passed, 3);
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract(dir.path(), "", "npm ERR! code 1").is_none());
    }
}
