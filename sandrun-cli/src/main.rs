//! Sandrun CLI
//!
//! Runs browser test bundles in sandboxes from the command line.
//!
//! The engine is configured from the environment (see
//! `sandrun_runner::Config::from_env`); flags override the sandbox mode and
//! the output format.

mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use sandrun_runner::{Config, SandboxMode};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sandrun")]
#[command(about = "Sandboxed browser test execution", long_about = None)]
struct Cli {
    /// Sandbox mode: local or cluster
    #[arg(long, env = "SANDBOX_MODE")]
    mode: Option<SandboxMode>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandrun_runner=info,sandrun_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    info!("Sandbox mode: {}", config.mode);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running job");
            trigger.cancel();
        }
    });

    handle_command(cli.command, &config, cli.json, &cancel).await
}
