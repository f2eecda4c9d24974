//! Caller-side job execution
//!
//! Wraps one façade call with its heartbeat and its cleanup, so callers get
//! the whole lifecycle from a single function.

use sandrun_core::domain::request::ExecutionRequest;
use sandrun_core::domain::result::ExecutionResult;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SandboxError;
use crate::heartbeat::{HeartbeatReporter, ProgressSink};
use crate::manager::SandboxManager;

/// Runs one job with heartbeats, then releases its sandbox
///
/// The heartbeat is stopped and awaited before the result is returned.
/// Cleanup runs whatever the outcome and its failures are only logged.
///
/// # Arguments
/// * `manager` - Sandbox to run in
/// * `request` - The job
/// * `cancel` - Caller's cancellation token, shared with the heartbeat
/// * `sink` - Heartbeat destination
/// * `interval` - Time between heartbeats
/// * `batch` - (index, total) when the job is one batch of several
pub async fn execute(
    manager: &dyn SandboxManager,
    request: &ExecutionRequest,
    cancel: &CancellationToken,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    batch: Option<(usize, usize)>,
) -> Result<ExecutionResult, SandboxError> {
    let reporter = HeartbeatReporter::start(&request.run_id, interval, sink, cancel, batch);

    let outcome = manager.run_tests(request, cancel).await;
    match &outcome {
        Ok(result) => {
            reporter.complete().await;
            info!("Run {}: finished with status {}", request.run_id, result.status);
        }
        Err(e) => {
            reporter.stop().await;
            warn!("Run {}: rejected: {}", request.run_id, e);
        }
    }

    if let Err(e) = manager.cleanup(&request.run_id).await {
        warn!("Run {}: cleanup failed: {}", request.run_id, e);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::ChannelSink;
    use crate::testing::FakeManager;
    use sandrun_core::domain::outcome::TestCounts;
    use sandrun_core::domain::result::ExecutionStatus;
    use sandrun_core::dto::progress::Phase;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_completes_and_sandbox_is_released() {
        let manager = FakeManager::new(|req| {
            let mut result = ExecutionResult::new(req);
            result.status = ExecutionStatus::Succeeded;
            result.apply_counts(TestCounts::new(3, 0, 0));
            Ok(result)
        });
        let (sink, mut rx) = ChannelSink::channel();
        let request = ExecutionRequest::new("run-1", "t1", "/x", "http://x");

        let result = execute(
            &manager,
            &request,
            &CancellationToken::new(),
            Arc::new(sink),
            Duration::from_secs(10),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.passed, 3);
        assert_eq!(manager.cleaned(), vec!["run-1".to_string()]);

        let mut phases = Vec::new();
        while let Ok(hb) = rx.try_recv() {
            phases.push(hb.phase);
        }
        assert_eq!(phases.first(), Some(&Phase::Initializing));
        assert_eq!(phases.last(), Some(&Phase::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_still_cleans_up() {
        let manager = FakeManager::new(|req| {
            req.validate()?;
            Ok(ExecutionResult::new(req))
        });
        let (sink, mut rx) = ChannelSink::channel();
        let request = ExecutionRequest::new("run-2", "", "/x", "http://x");

        let outcome = execute(
            &manager,
            &request,
            &CancellationToken::new(),
            Arc::new(sink),
            Duration::from_secs(10),
            None,
        )
        .await;

        assert!(matches!(outcome, Err(SandboxError::InvalidRequest(_))));
        assert_eq!(manager.cleaned(), vec!["run-2".to_string()]);
        let mut beats = Vec::new();
        while let Ok(hb) = rx.try_recv() {
            beats.push(hb);
        }
        assert!(beats.iter().all(|hb| hb.phase != Phase::Completed));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
