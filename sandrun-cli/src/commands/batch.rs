//! Batch command handler

use anyhow::Result;
use sandrun_core::domain::request::ExecutionRequest;
use sandrun_runner::batch::{BatchOrchestrator, TestBatch};
use sandrun_runner::heartbeat::TracingSink;
use sandrun_runner::{Config, build_manager};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::output::print_batch;

/// Splits the request's test files into batches and runs them in order
pub async fn handle_batch(
    request: ExecutionRequest,
    batch_size: usize,
    config: &Config,
    json: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let manager = build_manager(config)?;
    let batches = TestBatch::split(&request.test_files, batch_size);

    let orchestrator =
        BatchOrchestrator::new(manager, Arc::new(TracingSink), config.heartbeat_interval);
    let result = orchestrator.run(&request, &batches, cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_batch(&request.run_id, &result);
    }

    Ok(if !result.has_errors() && result.summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
