//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod batch;
mod cleanup;
mod run;
mod tiers;

use anyhow::Result;
use clap::{Args, Subcommand};
use sandrun_core::domain::request::{Browser, ExecutionRequest};
use sandrun_core::domain::resources::Tier;
use sandrun_runner::Config;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a test bundle in one sandbox
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Test files to run (default: all)
        files: Vec<String>,
    },
    /// Split test files into batches and run each in its own sandbox
    Batch {
        #[command(flatten)]
        request: RequestArgs,

        /// Test files per batch
        #[arg(long, default_value_t = 5)]
        batch_size: usize,

        /// Test files to split
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Release whatever a run left behind
    Cleanup {
        /// Run ID
        run_id: String,
    },
    /// Show the resources granted to each tier
    Tiers,
}

/// Job options shared by `run` and `batch`
#[derive(Args)]
pub struct RequestArgs {
    /// Bundle location: a local directory or a blob-store key (s3://bucket/key)
    pub scripts: String,

    /// Application under test
    #[arg(long, env = "SANDRUN_TARGET_URL")]
    pub target_url: String,

    /// Tenant owning the run
    #[arg(long, default_value = "local")]
    pub tenant: String,

    /// Project within the tenant
    #[arg(long, default_value = "")]
    pub project: String,

    /// Run ID (default: random)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Service tier: free, pro or enterprise
    #[arg(long, default_value = "free")]
    pub tier: String,

    /// Browser project
    #[arg(long, default_value = "chromium")]
    pub browser: Browser,

    /// Parallel workers (default: 2)
    #[arg(long, default_value_t = 0)]
    pub workers: u32,

    /// Retries per failing test
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Deadline in seconds (default: SANDBOX_DEFAULT_TIMEOUT)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Value passed to the tests as TEST_ENV
    #[arg(long = "env", default_value = "")]
    pub environment: String,

    /// Tag filter, e.g. @smoke
    #[arg(long)]
    pub filter: Option<String>,

    /// Test name pattern
    #[arg(long)]
    pub grep: Option<String>,
}

impl RequestArgs {
    /// Builds the request, generating a run id when none was given
    pub fn into_request(self, files: Vec<String>) -> ExecutionRequest {
        let run_id = self.run_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut request = ExecutionRequest::new(run_id, self.tenant, self.scripts, self.target_url)
            .with_tier(Tier::parse(&self.tier))
            .with_test_files(files);
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        request.project_id = self.project;
        request.browser = self.browser;
        request.workers = self.workers;
        request.retries = self.retries;
        request.environment = self.environment;
        request.test_filter = self.filter;
        request.grep_pattern = self.grep;
        request
    }
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - Engine configuration
/// * `json` - Print results as JSON instead of a summary
/// * `cancel` - Fired on Ctrl-C
///
/// # Returns
/// Process exit code: success only when every test ran and passed
pub async fn handle_command(
    command: Commands,
    config: &Config,
    json: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    match command {
        Commands::Run { request, files } => {
            run::handle_run(request.into_request(files), config, json, cancel).await
        }
        Commands::Batch {
            request,
            batch_size,
            files,
        } => batch::handle_batch(request.into_request(files), batch_size, config, json, cancel).await,
        Commands::Cleanup { run_id } => cleanup::handle_cleanup(&run_id, config).await,
        Commands::Tiers => tiers::handle_tiers(config, json),
    }
}
