//! Execution request types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::resources::Tier;

/// Worker count used when a request asks for neither workers nor parallelism
pub const DEFAULT_WORKERS: u32 = 2;

/// Longest run identifier accepted; the id becomes a directory name and a
/// cluster object name suffix
pub const MAX_RUN_ID_LEN: usize = 128;

/// Immutable description of one execution job
///
/// Built by the orchestration layer and never mutated afterwards. The
/// `run_id` keys every artifact, label, scratch directory and cleanup call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub run_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub tier: Tier,
    /// Local path or blob-store URI of the script bundle
    pub scripts_uri: String,
    pub target_url: String,
    /// Environment label (dev, staging, prod)
    #[serde(default)]
    pub environment: String,
    /// Total wall-clock budget; `None` uses the engine default
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub parallelism: u32,
    #[serde(default)]
    pub workers: u32,
    #[serde(default)]
    pub browser: Browser,
    /// Retries for flaky tests
    #[serde(default)]
    pub retries: u32,
    /// Explicit subset of test files to run
    #[serde(default)]
    pub test_files: Vec<String>,
    /// Tag filter such as `@smoke`
    #[serde(default)]
    pub test_filter: Option<String>,
    /// Test-name pattern
    #[serde(default)]
    pub grep_pattern: Option<String>,
}

impl ExecutionRequest {
    /// Creates a request with default options
    pub fn new(
        run_id: impl Into<String>,
        tenant_id: impl Into<String>,
        scripts_uri: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            project_id: String::new(),
            tier: Tier::Free,
            scripts_uri: scripts_uri.into(),
            target_url: target_url.into(),
            environment: String::new(),
            timeout_seconds: None,
            parallelism: 0,
            workers: 0,
            browser: Browser::default(),
            retries: 0,
            test_files: Vec::new(),
            test_filter: None,
            grep_pattern: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs());
        self
    }

    pub fn with_test_files(mut self, files: Vec<String>) -> Self {
        self.test_files = files;
        self
    }

    /// Returns the request timeout, or `default` when unset or zero
    pub fn timeout_or(&self, default: Duration) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default,
        }
    }

    /// Worker count passed to the test runner
    ///
    /// Falls back from `workers` to `parallelism` to [`DEFAULT_WORKERS`].
    pub fn effective_workers(&self) -> u32 {
        if self.workers > 0 {
            self.workers
        } else if self.parallelism > 0 {
            self.parallelism
        } else {
            DEFAULT_WORKERS
        }
    }

    /// Parses the bundle location
    pub fn bundle(&self) -> BundleLocation {
        BundleLocation::parse(&self.scripts_uri)
    }

    /// Rejects requests that can never run
    ///
    /// These are caller-programming errors; everything that can go wrong once
    /// a request is well formed is reported through the execution result.
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_run_id(&self.run_id)?;
        if self.tenant_id.is_empty() {
            return Err(RequestError::MissingField("tenant_id"));
        }
        if self.scripts_uri.trim().is_empty() {
            return Err(RequestError::MissingField("scripts_uri"));
        }
        if !self.target_url.starts_with("http://") && !self.target_url.starts_with("https://") {
            return Err(RequestError::InvalidTargetUrl(self.target_url.clone()));
        }
        Ok(())
    }
}

/// Checks that a run id is safe to use as a path component and object name
pub fn validate_run_id(run_id: &str) -> Result<(), RequestError> {
    if run_id.is_empty() {
        return Err(RequestError::MissingField("run_id"));
    }
    if run_id.len() > MAX_RUN_ID_LEN
        || run_id == "."
        || run_id == ".."
        || !run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(RequestError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

/// Malformed request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid run id '{0}': use 1-128 characters from [A-Za-z0-9._-]")]
    InvalidRunId(String),

    #[error("target url must start with http:// or https://: '{0}'")]
    InvalidTargetUrl(String),
}

/// Browser engine the test runner targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser: {}", other)),
        }
    }
}

/// Where a script bundle lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleLocation {
    /// Directory on the local filesystem
    Local(PathBuf),
    /// Zip archive in the blob store; `bucket` is `None` for bare keys
    Remote { bucket: Option<String>, key: String },
}

impl BundleLocation {
    /// Parses a bundle location
    ///
    /// Paths starting with `/`, `./` or `../` are local. Everything else is a
    /// blob reference: `s3://bucket/key`, `minio://bucket/key`, `bucket/key`,
    /// or a bare key resolved against the store's default bucket.
    pub fn parse(uri: &str) -> Self {
        let uri = uri.trim();
        if uri.starts_with('/') || uri.starts_with("./") || uri.starts_with("../") {
            return BundleLocation::Local(PathBuf::from(uri));
        }

        let stripped = uri
            .strip_prefix("s3://")
            .or_else(|| uri.strip_prefix("minio://"))
            .unwrap_or(uri);

        match stripped.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                BundleLocation::Remote {
                    bucket: Some(bucket.to_string()),
                    key: key.to_string(),
                }
            }
            _ => BundleLocation::Remote {
                bucket: None,
                key: stripped.to_string(),
            },
        }
    }
}
