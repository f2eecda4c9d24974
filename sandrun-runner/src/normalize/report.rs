//! Playwright JSON reporter model
//!
//! Only the fields the normalizer reads. Every field is optional on the wire:
//! older reporter versions put `status`/`duration`/`error` directly on the
//! test instead of in `results[]`.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Report {
    pub suites: Vec<Suite>,
    pub stats: Option<Stats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Suite {
    pub title: String,
    pub file: Option<String>,
    pub specs: Vec<Spec>,
    pub suites: Vec<Suite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Spec {
    pub id: Option<String>,
    pub title: String,
    pub file: Option<String>,
    pub tests: Vec<Test>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Test {
    pub project_name: Option<String>,
    /// Outcome over all attempts: expected, unexpected, flaky, skipped
    pub status: Option<String>,
    pub results: Vec<Attempt>,
    pub duration: Option<f64>,
    pub error: Option<ReportError>,
}

/// One attempt of a test
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Attempt {
    /// passed, failed, timedOut, skipped, interrupted
    pub status: Option<String>,
    /// Milliseconds
    pub duration: Option<f64>,
    pub error: Option<ReportError>,
    pub errors: Vec<ReportError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReportError {
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub expected: u32,
    pub unexpected: u32,
    pub flaky: u32,
    pub skipped: u32,
}

impl Attempt {
    pub fn error_message(&self) -> Option<String> {
        self.error
            .iter()
            .chain(self.errors.iter())
            .find_map(|e| e.message.clone())
    }
}
