//! Tiers command handler

use anyhow::Result;
use colored::*;
use sandrun_core::domain::resources::Tier;
use sandrun_runner::Config;
use std::process::ExitCode;

/// Prints the resources granted to each tier
pub fn handle_tiers(config: &Config, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.tiers)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Sandbox resources per tier:".bold());
    println!();
    println!(
        "  {:<12} {:>10} {:>10} {:>10} {:>10}",
        "TIER".dimmed(),
        "CPU REQ".dimmed(),
        "MEM REQ".dimmed(),
        "CPU LIM".dimmed(),
        "MEM LIM".dimmed()
    );
    for tier in [Tier::Free, Tier::Pro, Tier::Enterprise] {
        let limits = config.tiers.resolve(tier);
        println!(
            "  {:<12} {:>10} {:>10} {:>10} {:>10}",
            tier.as_str().cyan(),
            limits.cpu_request_quantity(),
            limits.memory_request_quantity(),
            limits.cpu_limit_quantity(),
            limits.memory_limit_quantity()
        );
    }

    Ok(ExitCode::SUCCESS)
}
