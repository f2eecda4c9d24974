//! Batch orchestration
//!
//! Splits a test set into batches and runs each one as its own job through
//! the sandbox façade. Batches are isolated: one that fails outright is
//! recorded and the rest still run.

use sandrun_core::domain::batch::{BatchResult, RunSummary};
use sandrun_core::domain::outcome::TestCounts;
use sandrun_core::domain::request::{ExecutionRequest, MAX_RUN_ID_LEN};
use sandrun_core::domain::result::{ExecutionResult, ExecutionStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SandboxError;
use crate::execution::execute;
use crate::heartbeat::ProgressSink;
use crate::manager::SandboxManager;

/// Test files run together in one sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestBatch {
    pub test_files: Vec<String>,
}

impl TestBatch {
    pub fn new(test_files: Vec<String>) -> Self {
        Self { test_files }
    }

    /// Chunks `files` into batches of at most `size` (at least 1)
    pub fn split(files: &[String], size: usize) -> Vec<TestBatch> {
        files
            .chunks(size.max(1))
            .map(|chunk| TestBatch::new(chunk.to_vec()))
            .collect()
    }
}

/// Runs batches one after another
pub struct BatchOrchestrator {
    manager: Arc<dyn SandboxManager>,
    sink: Arc<dyn ProgressSink>,
    heartbeat_interval: Duration,
}

impl BatchOrchestrator {
    /// Creates a new orchestrator
    ///
    /// # Arguments
    /// * `manager` - Sandbox every batch runs in
    /// * `sink` - Heartbeat destination, shared by all batches
    /// * `heartbeat_interval` - Time between heartbeats
    pub fn new(
        manager: Arc<dyn SandboxManager>,
        sink: Arc<dyn ProgressSink>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            manager,
            sink,
            heartbeat_interval,
        }
    }

    /// Runs every batch of `base` in index order
    ///
    /// Batch `i` runs as `<run_id>-b<i>` with the batch's test files in place
    /// of the request's.
    pub async fn run(
        &self,
        base: &ExecutionRequest,
        batches: &[TestBatch],
        cancel: &CancellationToken,
    ) -> BatchResult {
        let started = Instant::now();
        let total = batches.len();
        info!("Run {}: running {} batch(es)", base.run_id, total);

        let mut results = Vec::with_capacity(total);
        for (index, batch) in batches.iter().enumerate() {
            let mut request = base.clone();
            request.run_id = batch_run_id(&base.run_id, index);
            request.test_files = batch.test_files.clone();

            let outcome = execute(
                self.manager.as_ref(),
                &request,
                cancel,
                Arc::clone(&self.sink),
                self.heartbeat_interval,
                Some((index, total)),
            )
            .await;
            results.push(outcome);
        }

        let mut aggregated = aggregate(results);
        aggregated.duration = started.elapsed();
        info!(
            "Run {}: {} batch(es) done, {} passed, {} failed, {} errored",
            base.run_id,
            total,
            aggregated.summary.passed,
            aggregated.summary.failed,
            aggregated.errors.len()
        );
        aggregated
    }
}

/// Run id of batch `index`
///
/// The base is shortened when needed so the suffixed id stays within
/// [`MAX_RUN_ID_LEN`].
pub fn batch_run_id(run_id: &str, index: usize) -> String {
    let suffix = format!("-b{}", index);
    let room = MAX_RUN_ID_LEN.saturating_sub(suffix.len());
    let base: String = run_id.chars().take(room).collect();
    format!("{}{}", base, suffix)
}

/// Combines per-batch outcomes
///
/// A batch whose call errored or that ended `Error` or `Timeout` becomes one
/// entry in `errors` and contributes nothing to the totals. Positions are
/// preserved in `batch_results`.
pub fn aggregate(results: Vec<Result<ExecutionResult, SandboxError>>) -> BatchResult {
    let mut aggregated = BatchResult::default();
    let mut counts = TestCounts::default();
    let mut duration = Duration::ZERO;

    for (index, outcome) in results.into_iter().enumerate() {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("Batch {} failed: {}", index, e);
                aggregated.errors.push(format!("batch {}: {}", index, e));
                aggregated.batch_results.push(None);
                continue;
            }
        };

        duration += result.duration;
        if matches!(
            result.status,
            ExecutionStatus::Error | ExecutionStatus::Timeout
        ) {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| result.status.to_string());
            aggregated.errors.push(format!("batch {}: {}", index, reason));
        } else {
            counts += result.counts();
            aggregated.outcomes.extend(result.outcomes.iter().cloned());
        }
        aggregated.batch_results.push(Some(result));
    }

    aggregated.summary = RunSummary::from_counts(counts, duration);
    aggregated
}
