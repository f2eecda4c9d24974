//! Cluster sandbox
//!
//! Runs each job as a dedicated pod:
//! - Building and submitting the pod for the job's tier
//! - Watching it to a terminal phase under the job's deadline
//! - Collecting logs and the results the pod uploaded
//! - Deleting the pod on every exit path

pub mod monitor;
pub mod spec;

use async_trait::async_trait;
use chrono::Utc;
use sandrun_core::domain::artifact::ArtifactLayout;
use sandrun_core::domain::request::{ExecutionRequest, validate_run_id};
use sandrun_core::domain::resources::TierPolicy;
use sandrun_core::domain::result::{ExecutionResult, ExecutionStatus, ResultSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::monitor::{PodOutcome, wait_for_pod};
use self::spec::{MAIN_CONTAINER, PodTemplate, pod_name};
use crate::config::{Config, SandboxMode};
use crate::error::SandboxError;
use crate::interrupt::{Interrupted, race};
use crate::manager::SandboxManager;
use crate::normalize::{NO_RESULTS_MESSAGE, extract};
use crate::repository::{ArtifactStore, ClusterApi};

/// Bound on post-run calls that must not hang a finished job
///
/// Log and report transfers also stop on cancellation; the pod delete only
/// observes this bound.
const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_BUCKET: &str = "sandrun";

/// Deletes the pod unless released explicitly
///
/// Drop can't await, so the delete is spawned onto the runtime.
struct PodGuard {
    api: Arc<dyn ClusterApi>,
    name: String,
    armed: bool,
}

impl PodGuard {
    fn new(api: Arc<dyn ClusterApi>, name: String) -> Self {
        Self {
            api,
            name,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        match tokio::time::timeout(COLLECT_TIMEOUT, self.api.delete_pod(&self.name)).await {
            Ok(Ok(true)) => debug!("Deleted pod {}", self.name),
            Ok(Ok(false)) => debug!("Pod {} already gone", self.name),
            Ok(Err(e)) => warn!("Failed to delete pod {}: {:#}", self.name, e),
            Err(_) => warn!("Timed out deleting pod {}", self.name),
        }
    }
}

impl Drop for PodGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to delete pod {}", self.name);
            return;
        };
        let api = Arc::clone(&self.api);
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            if let Err(e) = api.delete_pod(&name).await {
                warn!("Failed to delete pod {}: {:#}", name, e);
            }
        });
    }
}

/// Sandbox running jobs as cluster pods
pub struct ClusterSandbox {
    api: Arc<dyn ClusterApi>,
    store: Arc<dyn ArtifactStore>,
    template: PodTemplate,
    tiers: TierPolicy,
    default_timeout: Duration,
}

impl ClusterSandbox {
    /// Creates a new cluster sandbox
    ///
    /// # Arguments
    /// * `config` - Engine configuration (pod template, tiers, default timeout)
    /// * `api` - Control plane repository
    /// * `store` - Artifact store the pods upload results to
    pub fn new(config: &Config, api: Arc<dyn ClusterApi>, store: Arc<dyn ArtifactStore>) -> Self {
        let bucket = config
            .storage
            .as_ref()
            .map(|s| s.bucket().to_string())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());

        Self {
            api,
            store,
            template: PodTemplate::new(config.cluster.clone(), bucket),
            tiers: config.tiers,
            default_timeout: config.default_timeout,
        }
    }

    /// Counts from the uploaded report, falling back to the log summary
    async fn collect_results(
        &self,
        layout: &ArtifactLayout,
        result: &mut ExecutionResult,
        cancel: &CancellationToken,
    ) {
        let key = layout.uploaded_results_json();
        let download = self.store.download(None, &key);
        let uploaded = match race(download, cancel, Instant::now() + COLLECT_TIMEOUT).await {
            Ok(Ok(raw)) => extract::from_bytes(raw, ResultSource::UploadedArtifact),
            Ok(Err(e)) => {
                debug!("Run {}: no uploaded report: {:#}", result.run_id, e);
                None
            }
            Err(interrupted) => {
                warn!("Run {}: uploaded report not fetched: {:?}", result.run_id, interrupted);
                None
            }
        };

        let extracted = match uploaded {
            Some(extracted) => {
                result.results_uri = Some(self.store.uri_for(&key));
                Some(extracted)
            }
            None => extract::from_log_scrape(&result.logs),
        };

        match extracted {
            Some(extracted) => {
                result.apply_counts(extracted.normalized.counts);
                result.outcomes = extracted.normalized.outcomes;
                result.raw_results = extracted.raw;
                result.result_source = extracted.source;
            }
            None => {
                warn!("Run {}: no test results found", result.run_id);
                result.error = Some(NO_RESULTS_MESSAGE.to_string());
            }
        }
    }

    async fn fetch_logs(&self, name: &str, result: &mut ExecutionResult, cancel: &CancellationToken) {
        let logs = self.api.pod_logs(name, MAIN_CONTAINER);
        match race(logs, cancel, Instant::now() + COLLECT_TIMEOUT).await {
            Ok(Ok(logs)) => result.logs = logs,
            Ok(Err(e)) => warn!("Run {}: could not fetch pod logs: {:#}", result.run_id, e),
            Err(interrupted) => warn!("Run {}: pod logs not fetched: {:?}", result.run_id, interrupted),
        }
    }

    async fn upload_log(
        &self,
        layout: &ArtifactLayout,
        result: &mut ExecutionResult,
        cancel: &CancellationToken,
    ) {
        let key = layout.execution_log();
        let upload = self.store.upload(
            &key,
            result.logs.clone().into_bytes(),
            "text/plain; charset=utf-8",
        );
        match race(upload, cancel, Instant::now() + COLLECT_TIMEOUT).await {
            Ok(Ok(uri)) => result.logs_uri = Some(uri),
            Ok(Err(e)) => warn!("Run {}: log upload failed: {:#}", result.run_id, e),
            Err(interrupted) => warn!("Run {}: log not uploaded: {:?}", result.run_id, interrupted),
        }
    }
}

#[async_trait]
impl SandboxManager for ClusterSandbox {
    async fn run_tests(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        request.validate()?;

        let run_id = &request.run_id;
        let timeout = request.timeout_or(self.default_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let layout = ArtifactLayout::new(&request.tenant_id, run_id);

        let mut result = ExecutionResult::new(request);
        result.status = ExecutionStatus::Running;

        let limits = self.tiers.resolve(request.tier);
        let pod = match self.template.build(request, &limits, timeout, Utc::now()) {
            Ok(pod) => pod,
            Err(e) => {
                error!("Run {}: {:#}", run_id, e);
                result.fail(ExecutionStatus::Error, format!("{:#}", e));
                result.duration = started.elapsed();
                return Ok(result);
            }
        };
        let name = pod.metadata.name.clone();
        info!(
            "Run {}: submitting pod {} (tier {}, timeout {:?})",
            run_id, name, request.tier, timeout
        );

        match race(self.api.create_pod(&pod), cancel, deadline).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Run {}: pod submission failed: {:#}", run_id, e);
                result.fail(
                    ExecutionStatus::Error,
                    format!("pod submission failed: {:#}", e),
                );
                result.duration = started.elapsed();
                return Ok(result);
            }
            Err(interrupted) => {
                // The create may still have landed
                let guard = PodGuard::new(Arc::clone(&self.api), name);
                guard.release().await;
                interrupted.apply(&mut result, timeout);
                result.duration = started.elapsed();
                return Ok(result);
            }
        }
        let guard = PodGuard::new(Arc::clone(&self.api), name.clone());

        let outcome = wait_for_pod(self.api.as_ref(), &name, cancel, deadline).await;
        debug!("Run {}: pod {} ended with {:?}", run_id, name, outcome);

        self.fetch_logs(&name, &mut result, cancel).await;

        match outcome {
            Ok(PodOutcome::Exited(code)) if cancel.is_cancelled() => {
                // Collection was cut short; nothing left to count from
                result.exit_code = code;
                Interrupted::Cancelled.apply(&mut result, timeout);
            }
            Ok(PodOutcome::Exited(code)) => {
                result.exit_code = code;
                result.status = if code == 0 {
                    ExecutionStatus::Succeeded
                } else {
                    ExecutionStatus::Failed
                };
                self.collect_results(&layout, &mut result, cancel).await;
                if result.status == ExecutionStatus::Failed && result.failed == 0 {
                    result.error = Some(format!("test runner exited with code {}", code));
                }
                result.artifacts_uri = Some(self.store.uri_for(&layout.uploaded_results_prefix()));
            }
            Ok(PodOutcome::DeadlineExceeded) => {
                Interrupted::DeadlineExceeded.apply(&mut result, timeout);
            }
            Ok(PodOutcome::NeverRan(reason)) => {
                result.fail(
                    ExecutionStatus::Error,
                    format!("test runner never started: {}", reason),
                );
            }
            Ok(PodOutcome::Deleted) => {
                result.fail(
                    ExecutionStatus::Error,
                    "sandbox pod was deleted before completion",
                );
            }
            Ok(PodOutcome::WatchFailed(e)) => {
                result.fail(
                    ExecutionStatus::Error,
                    format!("lost track of sandbox pod: {}", e),
                );
            }
            Err(interrupted) => {
                warn!("Run {}: {:?}", run_id, interrupted);
                interrupted.apply(&mut result, timeout);
            }
        }

        self.upload_log(&layout, &mut result, cancel).await;
        guard.release().await;

        result.duration = started.elapsed();
        info!(
            "Run {}: {} in {:?} ({} passed, {} failed, {} skipped)",
            run_id, result.status, result.duration, result.passed, result.failed, result.skipped
        );
        Ok(result)
    }

    async fn cleanup(&self, run_id: &str) -> Result<(), SandboxError> {
        validate_run_id(run_id)?;
        let name = pod_name(run_id);

        match self.api.delete_pod(&name).await {
            Ok(true) => info!("Run {}: deleted pod {}", run_id, name),
            Ok(false) => debug!("Run {}: nothing to clean up", run_id),
            Err(e) => warn!("Run {}: failed to delete pod {}: {:#}", run_id, name, e),
        }
        Ok(())
    }

    fn mode(&self) -> SandboxMode {
        SandboxMode::Cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::testing::{FakeCluster, MemoryArtifactStore, pod_event};

    const REPORT: &str = r#"{
        "suites": [{
            "title": "login.spec.ts",
            "file": "login.spec.ts",
            "specs": [
                {"id": "a1", "title": "logs in", "file": "login.spec.ts",
                 "tests": [{"projectName": "chromium", "status": "expected",
                            "results": [{"status": "passed", "duration": 120}]}]},
                {"id": "a2", "title": "rejects bad password", "file": "login.spec.ts",
                 "tests": [{"projectName": "chromium", "status": "unexpected",
                            "results": [{"status": "failed", "duration": 300,
                                         "error": {"message": "expected 401"}}]}]}
            ]
        }],
        "stats": {"expected": 1, "unexpected": 1, "flaky": 0, "skipped": 0}
    }"#;

    struct Harness {
        cluster: Arc<FakeCluster>,
        store: Arc<MemoryArtifactStore>,
        sandbox: ClusterSandbox,
    }

    fn harness() -> Harness {
        let config = Config::new(SandboxMode::Cluster).with_storage(StorageConfig::Http {
            url: "http://store:9000".into(),
            bucket: "sandrun".into(),
            token: None,
        });
        let cluster = Arc::new(FakeCluster::new());
        let store = Arc::new(MemoryArtifactStore::new());
        let sandbox = ClusterSandbox::new(
            &config,
            Arc::clone(&cluster) as Arc<dyn ClusterApi>,
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
        );
        Harness {
            cluster,
            store,
            sandbox,
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("run-7", "t1", "s3://bundles/t1/suite.zip", "https://app.test")
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_uses_uploaded_report() {
        let h = harness();
        h.cluster.script_watch(vec![
            pod_event("ADDED", "Pending", "", None),
            pod_event("MODIFIED", "Failed", "", Some(1)),
        ]);
        h.cluster.set_logs("Running 2 tests\n  1 passed\n  1 failed\n");
        h.store.insert("t1/run-7/results/results.json", REPORT);

        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.result_source, ResultSource::UploadedArtifact);
        assert_eq!((result.total_tests, result.passed, result.failed), (2, 1, 1));
        assert!(result.error.is_none());
        assert_eq!(
            result.results_uri.as_deref(),
            Some("mem://sandrun/t1/run-7/results/results.json")
        );
        assert!(h.store.get("t1/run-7/execution.log").is_some());

        assert_eq!(h.cluster.created()[0].metadata.name, "sandbox-run-7");
        assert_eq!(h.cluster.deleted(), vec!["sandbox-run-7".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_fall_back_to_logs() {
        let h = harness();
        h.cluster
            .script_watch(vec![pod_event("MODIFIED", "Succeeded", "", Some(0))]);
        h.cluster.set_logs("  4 passed (3.1s)\n");

        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.result_source, ResultSource::LogScrape);
        assert_eq!((result.total_tests, result.passed), (4, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_fabricates_counts() {
        let h = harness();
        h.cluster
            .script_hanging_watch(vec![pod_event("ADDED", "Running", "", None)]);
        h.cluster.set_logs("  4 passed\n");
        let req = request().with_timeout(Duration::from_secs(60));

        let result = h
            .sandbox
            .run_tests(&req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.total_tests, 0);
        assert!(result.error.unwrap().contains("60s"));
        assert_eq!(h.cluster.deleted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_deletes_pod() {
        let h = harness();
        h.cluster.script_hanging_watch(vec![]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = h.sandbox.run_tests(&request(), &cancel).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.as_deref(), Some(crate::interrupt::CANCELLED_MESSAGE));
        assert_eq!(h.cluster.deleted(), vec!["sandbox-run-7".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_and_deletion() {
        let h = harness();
        h.cluster.fail_creates();
        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("pod submission failed"));

        let h = harness();
        h.cluster
            .script_watch(vec![pod_event("DELETED", "Running", "", None)]);
        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("deleted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_without_results_reports_error() {
        let h = harness();
        h.cluster
            .script_watch(vec![pod_event("MODIFIED", "Succeeded", "", Some(0))]);
        h.cluster.set_logs("npm ERR! something\n");

        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.total_tests, 0);
        assert_eq!(result.result_source, ResultSource::None);
        assert_eq!(result.error.as_deref(), Some(NO_RESULTS_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_bundle_fetch_is_an_error() {
        let mut event = pod_event("MODIFIED", "Failed", "", None);
        event.object["status"]["initContainerStatuses"] = serde_json::json!([{
            "name": "init-scripts",
            "state": { "terminated": { "exitCode": 8, "reason": "Error" } }
        }]);
        let h = harness();
        h.cluster.script_watch(vec![event]);

        let result = h
            .sandbox
            .run_tests(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.status.is_retryable());
        let error = result.error.unwrap();
        assert!(error.contains("never started"), "{}", error);
        assert!(error.contains("init-scripts"), "{}", error);
        assert_eq!(h.cluster.deleted(), vec!["sandbox-run-7".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_log_fetch_unwinds_promptly() {
        let h = harness();
        h.cluster
            .script_watch(vec![pod_event("MODIFIED", "Succeeded", "", Some(0))]);
        h.cluster.hang_logs();
        h.store.insert("t1/run-7/results/results.json", REPORT);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let started = Instant::now();

        let result = h.sandbox.run_tests(&request(), &cancel).await.unwrap();

        assert!(started.elapsed() < COLLECT_TIMEOUT);
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.as_deref(), Some(crate::interrupt::CANCELLED_MESSAGE));
        assert_eq!(result.total_tests, 0);
        assert!(result.logs_uri.is_none());
        assert_eq!(h.cluster.deleted(), vec!["sandbox-run-7".to_string()]);
    }

    #[tokio::test]
    async fn test_local_bundle_is_an_error() {
        let h = harness();
        let req = ExecutionRequest::new("run-7", "t1", "/srv/suite", "https://app.test");
        let result = h
            .sandbox
            .run_tests(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(h.cluster.created().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let h = harness();
        h.sandbox.cleanup("run-7").await.unwrap();
        h.sandbox.cleanup("run-7").await.unwrap();
        assert_eq!(h.cluster.deleted().len(), 2);
        assert!(matches!(
            h.sandbox.cleanup("bad/id").await,
            Err(SandboxError::InvalidRequest(_))
        ));
    }
}
