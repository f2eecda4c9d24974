//! Summary-line scraping
//!
//! Last resort when no structured report exists: the list reporter ends with
//! lines such as `  8 passed (12.3s)`, `  2 failed` and `  1 skipped`.

use regex::Regex;
use sandrun_core::domain::outcome::TestCounts;

const SUMMARY_LINE: &str = r"(?m)^\s*(\d+)\s+(passed|failed|skipped|flaky)\b";
const ANSI_ESCAPE: &str = r"\x1b\[[0-9;]*m";

/// Counts from summary lines, `None` when the text has none
///
/// Lines may appear in any order among other output; when a kind repeats
/// the last line wins. The list reporter prints flaky tests separately from
/// passed ones, so they are added to `passed`.
pub fn scrape_summary(text: &str) -> Option<TestCounts> {
    let summary = Regex::new(SUMMARY_LINE).ok()?;
    let ansi = Regex::new(ANSI_ESCAPE).ok()?;
    let text = ansi.replace_all(text, "");

    let mut found = false;
    let mut counts = TestCounts::default();
    let mut flaky = 0;

    for caps in summary.captures_iter(&text) {
        let Ok(n) = caps[1].parse::<u32>() else {
            continue;
        };
        found = true;
        match &caps[2] {
            "passed" => counts.passed = n,
            "failed" => counts.failed = n,
            "skipped" => counts.skipped = n,
            _ => flaky = n,
        }
    }

    if !found {
        return None;
    }

    counts.passed += flaky;
    counts.flaky = flaky;
    Some(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_in_any_order_with_noise() {
        let log = "\
Running 11 tests using 2 workers
  ✓  1 [chromium] › login.spec.ts:3:1 › logs in (1.2s)
  1 skipped
npm WARN something
  2 failed
    [chromium] › cart.spec.ts:9:1 › adds item
  8 passed (12.3s)
";
        assert_eq!(scrape_summary(log), Some(TestCounts::new(8, 2, 1)));
    }

    #[test]
    fn test_scrape_counts_flaky_as_passed() {
        let counts = scrape_summary("  1 flaky\n  4 passed (3s)\n").unwrap();
        assert_eq!(counts.passed, 5);
        assert_eq!(counts.flaky, 1);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_scrape_strips_color_codes() {
        let log = "\x1b[32m  3 passed\x1b[39m (1s)\n\x1b[31m  1 failed\x1b[39m\n";
        assert_eq!(scrape_summary(log), Some(TestCounts::new(3, 1, 0)));
    }

    #[test]
    fn test_scrape_without_summary() {
        assert_eq!(scrape_summary("npm ERR! missing script: test"), None);
        assert_eq!(scrape_summary("see 3 passed tests above"), None);
    }
}
