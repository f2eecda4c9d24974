//! Run command handler

use anyhow::Result;
use sandrun_core::domain::request::ExecutionRequest;
use sandrun_core::domain::result::ExecutionStatus;
use sandrun_runner::execution::execute;
use sandrun_runner::heartbeat::TracingSink;
use sandrun_runner::{Config, build_manager};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::output::print_result;

/// Exit status for sandbox failures worth resubmitting (EX_TEMPFAIL)
const RETRYABLE_EXIT: u8 = 75;

/// Maps a run's status to the process exit status
///
/// 0 when every test passed, 75 when the sandbox itself failed or timed out,
/// 1 when tests failed.
fn exit_status(status: ExecutionStatus) -> u8 {
    if status == ExecutionStatus::Succeeded {
        0
    } else if status.is_retryable() {
        RETRYABLE_EXIT
    } else {
        1
    }
}

/// Runs one job and prints its result
pub async fn handle_run(
    request: ExecutionRequest,
    config: &Config,
    json: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let manager = build_manager(config)?;

    let result = execute(
        manager.as_ref(),
        &request,
        cancel,
        Arc::new(TracingSink),
        config.heartbeat_interval,
        None,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(ExitCode::from(exit_status(result.status)))
}
