//! Progress heartbeats
//!
//! While a job runs a background task emits a heartbeat every interval so
//! the caller can tell a slow job from a dead one. The percentage is a
//! liveness signal: it creeps up and saturates below 100, and only
//! [`HeartbeatReporter::complete`] reports 100.

use sandrun_core::dto::progress::{Heartbeat, Phase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress reported when execution starts
const EXECUTING_START: u8 = 20;
/// Increment per tick
const EXECUTING_STEP: u8 = 5;
/// Ceiling until completion is confirmed
const EXECUTING_CEILING: u8 = 90;

/// Destination for heartbeats
pub trait ProgressSink: Send + Sync {
    fn emit(&self, heartbeat: Heartbeat);
}

/// Logs heartbeats
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, heartbeat: Heartbeat) {
        match heartbeat.batch {
            Some((index, total)) => info!(
                "Heartbeat run={} phase={} progress={} batch={}/{}",
                heartbeat.run_id,
                heartbeat.phase,
                heartbeat.progress,
                index + 1,
                total
            ),
            None => info!(
                "Heartbeat run={} phase={} progress={}",
                heartbeat.run_id, heartbeat.phase, heartbeat.progress
            ),
        }
    }
}

/// Forwards heartbeats over a channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Heartbeat>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Heartbeat>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Heartbeat>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, heartbeat: Heartbeat) {
        if self.tx.send(heartbeat).is_err() {
            debug!("Heartbeat receiver dropped");
        }
    }
}

/// Heartbeat loop for one job
///
/// Stops when [`complete`](Self::complete) is called, when the job's
/// cancellation token fires, or when the reporter is dropped.
pub struct HeartbeatReporter {
    run_id: String,
    batch: Option<(usize, usize)>,
    sink: Arc<dyn ProgressSink>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatReporter {
    /// Emits the initial heartbeats and starts the periodic loop
    ///
    /// # Arguments
    /// * `run_id` - Job the heartbeats belong to
    /// * `interval` - Time between periodic heartbeats
    /// * `sink` - Where heartbeats go
    /// * `cancel` - The job's cancellation token
    /// * `batch` - (index, total) when the job is one batch of several
    pub fn start(
        run_id: impl Into<String>,
        interval: Duration,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
        batch: Option<(usize, usize)>,
    ) -> Self {
        let run_id = run_id.into();
        let stop = cancel.child_token();

        let beat = move |run_id: &str, phase: Phase, progress: u8| {
            let mut heartbeat = Heartbeat::new(run_id, phase, progress);
            heartbeat.batch = batch;
            heartbeat
        };

        sink.emit(beat(&run_id, Phase::Initializing, 0));
        sink.emit(beat(&run_id, Phase::Provisioning, 10));

        let handle = {
            let run_id = run_id.clone();
            let sink = Arc::clone(&sink);
            let stop = stop.clone();

            tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                let mut progress = EXECUTING_START;

                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            progress = progress.saturating_add(EXECUTING_STEP).min(EXECUTING_CEILING);
                            sink.emit(beat(&run_id, Phase::Executing, progress));
                        }
                    }
                }

                debug!("Heartbeat loop stopped for run {}", run_id);
            })
        };

        Self {
            run_id,
            batch,
            sink,
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the loop, waits for it, then reports completion once
    pub async fn complete(mut self) {
        self.join().await;

        let mut heartbeat = Heartbeat::new(&self.run_id, Phase::Completed, 100);
        heartbeat.batch = self.batch;
        self.sink.emit(heartbeat);
    }

    /// Stops the loop and waits for it without reporting completion
    pub async fn stop(mut self) {
        self.join().await;
    }

    async fn join(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Heartbeat task for run {} panicked: {}", self.run_id, e);
            }
        }
    }
}

impl Drop for HeartbeatReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
