//! Cleanup command handler

use anyhow::Result;
use colored::*;
use sandrun_runner::{Config, build_manager};
use std::process::ExitCode;

/// Releases a run's scratch directory or pod
pub async fn handle_cleanup(run_id: &str, config: &Config) -> Result<ExitCode> {
    let manager = build_manager(config)?;
    manager.cleanup(run_id).await?;

    println!("{} Cleaned up run {}", "✓".green(), run_id.bold());
    Ok(ExitCode::SUCCESS)
}
