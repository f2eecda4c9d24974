//! Subprocess execution
//!
//! Children run in their own process group so that a cancelled or timed-out
//! job takes its whole tree (package manager, test runner, browsers) down
//! with it.

use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::interrupt::{Interrupted, race};

/// Time between SIGTERM and SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Time allowed for output readers to drain after the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a command ended and what it printed
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, or the interruption that stopped it
    pub end: Result<i32, Interrupted>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        matches!(self.end, Ok(0))
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Kills the process group on drop
///
/// Anchored right after spawn so every exit path, including a dropped
/// future, reaps stragglers.
struct ProcessGroupGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid {
            // ESRCH once the group is gone
            let _ = killpg(Pid::from_raw(pgid as i32), signal);
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        self.signal(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn kill(&self) {
        self.signal(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Runs a command to completion, cancellation or deadline
///
/// stdin is closed; stdout and stderr are captured in full.
pub async fn run_command(
    mut cmd: Command,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let guard = ProcessGroupGuard { pgid: child.id() };
    debug!("Spawned {} (pid {:?})", program, child.id());

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let waited = race(child.wait(), cancel, deadline).await;
    let end = match waited {
        Ok(status) => Ok(exit_code(status.context("Failed to wait for process")?)),
        Err(interrupted) => {
            warn!("Stopping {}: {:?}", program, interrupted);
            guard.terminate();
            if tokio::time::timeout(TERMINATE_GRACE, child.wait())
                .await
                .is_err()
            {
                guard.kill();
                let _ = child.kill().await;
            }
            Err(interrupted)
        }
    };

    // Stragglers still holding the pipes would block the readers
    guard.kill();
    drop(guard);

    Ok(CommandOutput {
        end,
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
    })
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!("Output pipe closed with error: {}", e);
            }
        }
        buf
    })
}

async fn drain(reader: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            warn!("Output reader did not finish in time");
            String::new()
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
