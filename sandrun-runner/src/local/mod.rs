//! Local sandbox
//!
//! Runs a job as subprocesses on this host:
//! - Materializing the bundle into a scratch directory keyed by run id
//! - Installing dependencies and the browser
//! - Running the test runner under the job's deadline
//! - Extracting results and uploading artifacts

pub mod artifacts;
pub mod bundle;
pub mod process;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sandrun_core::domain::request::{BundleLocation, ExecutionRequest, validate_run_id};
use sandrun_core::domain::result::{ExecutionResult, ExecutionStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::args::{RESULT_FILE, test_args};
use crate::config::{Config, SandboxMode};
use crate::error::SandboxError;
use crate::interrupt::{Interrupted, race};
use crate::manager::SandboxManager;
use crate::normalize::{NO_RESULTS_MESSAGE, extract};
use crate::repository::ArtifactStore;

use self::process::{CommandOutput, run_command};

/// Why a phase stopped the job
enum Halt {
    Interrupted(Interrupted),
    Infrastructure(anyhow::Error),
}

impl From<Interrupted> for Halt {
    fn from(value: Interrupted) -> Self {
        Halt::Interrupted(value)
    }
}

impl From<anyhow::Error> for Halt {
    fn from(value: anyhow::Error) -> Self {
        Halt::Infrastructure(value)
    }
}

/// Sandbox running jobs as local subprocesses
pub struct LocalSandbox {
    work_dir: PathBuf,
    npm_bin: String,
    npx_bin: String,
    default_timeout: Duration,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl LocalSandbox {
    /// Creates a new local sandbox
    ///
    /// # Arguments
    /// * `config` - Engine configuration (work dir, binaries, default timeout)
    /// * `store` - Artifact store for remote bundles and uploads
    pub fn new(config: &Config, store: Option<Arc<dyn ArtifactStore>>) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            npm_bin: config.npm_bin.clone(),
            npx_bin: config.npx_bin.clone(),
            default_timeout: config.default_timeout,
            store,
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.work_dir.join(run_id)
    }

    /// Provision, execute and collect; `result` holds whatever was reached
    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
        deadline: Instant,
        result: &mut ExecutionResult,
    ) -> Result<(), Halt> {
        let run_id = &request.run_id;
        let run_dir = self.run_dir(run_id);

        let scripts_dir = self
            .materialize(request, &run_dir, cancel, deadline)
            .await
            .map_err(|halt| match halt {
                Halt::Infrastructure(e) => {
                    Halt::Infrastructure(e.context("bundle materialization failed"))
                }
                other => other,
            })?;
        info!("Run {}: bundle ready at {}", run_id, scripts_dir.display());

        self.install_dependencies(run_id, &scripts_dir, cancel, deadline, result)
            .await?;
        self.install_browser(request, &scripts_dir, cancel, deadline, result)
            .await?;

        let output = self
            .run_test_runner(request, &scripts_dir, cancel, deadline)
            .await?;
        append_log(&mut result.logs, "npx playwright test", &output.combined());

        let exit_code = match output.end {
            Ok(code) => code,
            Err(interrupted) => return Err(interrupted.into()),
        };
        result.exit_code = exit_code;
        result.status = if exit_code == 0 {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        info!("Run {}: test runner exited with code {}", run_id, exit_code);

        let extracted = {
            let dir = scripts_dir.clone();
            let stdout = output.stdout.clone();
            let logs = output.combined();
            tokio::task::spawn_blocking(move || extract(&dir, &stdout, &logs))
                .await
                .context("Result extraction task failed")?
        };

        match extracted {
            Some(extracted) => {
                debug!(
                    "Run {}: results from {:?}",
                    run_id, extracted.source
                );
                result.apply_counts(extracted.normalized.counts);
                result.outcomes = extracted.normalized.outcomes;
                result.raw_results = extracted.raw;
                result.result_source = extracted.source;
            }
            None => {
                warn!("Run {}: no test results found in any location", run_id);
                result.error = Some(NO_RESULTS_MESSAGE.to_string());
            }
        }

        if result.status == ExecutionStatus::Failed && result.failed == 0 {
            result.error = Some(format!("test runner exited with code {}", exit_code));
        }

        if let Some(store) = &self.store {
            artifacts::upload_artifacts(store.as_ref(), &scripts_dir, result, cancel).await;
        }

        Ok(())
    }

    /// Copies or downloads the bundle into `<run_dir>/scripts`
    async fn materialize(
        &self,
        request: &ExecutionRequest,
        run_dir: &Path,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<PathBuf, Halt> {
        // A previous attempt with the same run id may have left files behind
        if run_dir.exists() {
            tokio::fs::remove_dir_all(run_dir)
                .await
                .with_context(|| format!("Failed to clear {}", run_dir.display()))?;
        }
        let scripts_dir = run_dir.join("scripts");

        match request.bundle() {
            BundleLocation::Local(src) => {
                let dst = scripts_dir.clone();
                let copy = tokio::task::spawn_blocking(move || bundle::copy_bundle(&src, &dst));
                race(copy, cancel, deadline)
                    .await?
                    .context("Bundle copy task failed")??;
                Ok(scripts_dir)
            }
            BundleLocation::Remote { bucket, key } => {
                let store = self
                    .store
                    .as_ref()
                    .context("remote bundle requires an artifact store")?;
                let data = race(store.download(bucket.as_deref(), &key), cancel, deadline).await??;
                debug!("Downloaded bundle {} ({} bytes)", key, data.len());

                let dst = scripts_dir.clone();
                let unpack = tokio::task::spawn_blocking(move || bundle::unpack_zip(&data, &dst));
                let root = race(unpack, cancel, deadline)
                    .await?
                    .context("Bundle unpack task failed")??;
                Ok(root)
            }
        }
    }

    /// `npm ci --prefer-offline`, falling back to `npm install`
    async fn install_dependencies(
        &self,
        run_id: &str,
        scripts_dir: &Path,
        cancel: &CancellationToken,
        deadline: Instant,
        result: &mut ExecutionResult,
    ) -> Result<(), Halt> {
        let mut ci = Command::new(&self.npm_bin);
        ci.args(["ci", "--prefer-offline"]).current_dir(scripts_dir);
        let first = run_command(ci, cancel, deadline).await?;
        append_log(&mut result.logs, "npm ci --prefer-offline", &first.combined());
        first.end?;
        if first.succeeded() {
            return Ok(());
        }

        warn!("Run {}: npm ci failed, retrying with npm install", run_id);
        let mut install = Command::new(&self.npm_bin);
        install.arg("install").current_dir(scripts_dir);
        let second = run_command(install, cancel, deadline).await?;
        append_log(&mut result.logs, "npm install", &second.combined());
        second.end?;
        if second.succeeded() {
            return Ok(());
        }

        result.error_details = Some(format!(
            "npm ci:\n{}\nnpm install:\n{}",
            first.stderr.trim(),
            second.stderr.trim()
        ));
        Err(Halt::Infrastructure(anyhow::anyhow!(
            "dependency installation failed (npm ci exit {:?}, npm install exit {:?})",
            first.end,
            second.end
        )))
    }

    /// Best-effort `npx playwright install <browser>`
    async fn install_browser(
        &self,
        request: &ExecutionRequest,
        scripts_dir: &Path,
        cancel: &CancellationToken,
        deadline: Instant,
        result: &mut ExecutionResult,
    ) -> Result<(), Halt> {
        let mut cmd = Command::new(&self.npx_bin);
        cmd.args(["playwright", "install", request.browser.as_str()])
            .current_dir(scripts_dir);

        match run_command(cmd, cancel, deadline).await {
            Ok(output) => {
                append_log(&mut result.logs, "npx playwright install", &output.combined());
                output.end?;
                if !output.succeeded() {
                    warn!(
                        "Run {}: browser install failed, continuing",
                        request.run_id
                    );
                }
            }
            Err(e) => warn!(
                "Run {}: browser install could not start, continuing: {:#}",
                request.run_id, e
            ),
        }
        Ok(())
    }

    async fn run_test_runner(
        &self,
        request: &ExecutionRequest,
        scripts_dir: &Path,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<CommandOutput, Halt> {
        let args = test_args(request, "json");
        info!("Run {}: {} {}", request.run_id, self.npx_bin, args.join(" "));

        let mut cmd = Command::new(&self.npx_bin);
        cmd.args(&args)
            .current_dir(scripts_dir)
            .env("CI", "true")
            .env("BASE_URL", &request.target_url)
            .env("TEST_ENV", &request.environment)
            .env("SANDBOX_RUN_ID", &request.run_id)
            .env("PLAYWRIGHT_JSON_OUTPUT_NAME", scripts_dir.join(RESULT_FILE));

        Ok(run_command(cmd, cancel, deadline).await?)
    }
}

fn append_log(logs: &mut String, step: &str, output: &str) {
    if !logs.is_empty() && !logs.ends_with('\n') {
        logs.push('\n');
    }
    logs.push_str(&format!("==> {}\n", step));
    logs.push_str(output);
}

#[async_trait]
impl SandboxManager for LocalSandbox {
    async fn run_tests(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        request.validate()?;

        let timeout = request.timeout_or(self.default_timeout);
        let started = Instant::now();
        let deadline = started + timeout;

        let mut result = ExecutionResult::new(request);
        result.status = ExecutionStatus::Running;
        info!(
            "Run {}: starting local sandbox (timeout {:?})",
            request.run_id, timeout
        );

        match self.execute(request, cancel, deadline, &mut result).await {
            Ok(()) => {}
            Err(Halt::Interrupted(interrupted)) => {
                warn!("Run {}: {:?}", request.run_id, interrupted);
                interrupted.apply(&mut result, timeout);
            }
            Err(Halt::Infrastructure(e)) => {
                error!("Run {}: {:#}", request.run_id, e);
                result.fail(ExecutionStatus::Error, format!("{:#}", e));
            }
        }

        result.duration = started.elapsed();
        info!(
            "Run {}: {} in {:?} ({} passed, {} failed, {} skipped)",
            request.run_id,
            result.status,
            result.duration,
            result.passed,
            result.failed,
            result.skipped
        );
        Ok(result)
    }

    async fn cleanup(&self, run_id: &str) -> Result<(), SandboxError> {
        validate_run_id(run_id)?;
        let dir = self.run_dir(run_id);

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!("Run {}: removed {}", run_id, dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Run {}: nothing to clean up", run_id)
            }
            Err(e) => warn!("Run {}: failed to remove {}: {}", run_id, dir.display(), e),
        }
        Ok(())
    }

    fn mode(&self) -> SandboxMode {
        SandboxMode::Local
    }
}
