//! Artifact key layout
//!
//! All artifacts for a run live under `<tenant_id>/<run_id>/` so the
//! reporting stage can find them without knowing which runner produced them.

/// Key builder for one run's artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    prefix: String,
}

impl ArtifactLayout {
    pub fn new(tenant_id: &str, run_id: &str) -> Self {
        Self {
            prefix: format!("{}/{}", tenant_id, run_id),
        }
    }

    /// `<tenant>/<run>`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn execution_log(&self) -> String {
        format!("{}/execution.log", self.prefix)
    }

    pub fn results_json(&self) -> String {
        format!("{}/results.json", self.prefix)
    }

    pub fn screenshots_prefix(&self) -> String {
        format!("{}/screenshots/", self.prefix)
    }

    pub fn screenshot(&self, file_name: &str) -> String {
        format!("{}{}", self.screenshots_prefix(), file_name)
    }

    pub fn videos_prefix(&self) -> String {
        format!("{}/videos/", self.prefix)
    }

    pub fn traces_prefix(&self) -> String {
        format!("{}/traces/", self.prefix)
    }

    /// Where a cluster sandbox uploads its results volume
    pub fn uploaded_results_prefix(&self) -> String {
        format!("{}/results", self.prefix)
    }

    /// Structured report inside the uploaded results volume
    pub fn uploaded_results_json(&self) -> String {
        format!("{}/results/results.json", self.prefix)
    }
}
