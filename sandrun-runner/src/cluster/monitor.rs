//! Pod watching
//!
//! Follows a sandbox pod through the watch stream until it reaches a
//! terminal phase, disappears, or the job is interrupted. Streams that end
//! or report an error are re-opened.

use sandrun_client::pod::{PodPhase, WatchEventType};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::spec::MAIN_CONTAINER;
use crate::interrupt::{Interrupted, race};
use crate::repository::ClusterApi;

/// Consecutive failures to open a watch before giving up
const MAX_WATCH_FAILURES: u32 = 5;
/// Pause before re-opening a watch
const REWATCH_BACKOFF: Duration = Duration::from_secs(1);

/// How a sandbox pod ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodOutcome {
    /// Main container finished with this exit code
    Exited(i32),
    /// Pod failed before the main container ran, e.g. the bundle fetch
    NeverRan(String),
    /// Killed by the pod's own active deadline
    DeadlineExceeded,
    /// Removed before reaching a terminal phase
    Deleted,
    /// The watch could not be kept open
    WatchFailed(String),
}

/// Watches `name` until it terminates
pub async fn wait_for_pod(
    api: &dyn ClusterApi,
    name: &str,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<PodOutcome, Interrupted> {
    let mut failures = 0;

    loop {
        let mut events = match race(api.watch_pod(name), cancel, deadline).await? {
            Ok(events) => {
                failures = 0;
                events
            }
            Err(e) => {
                failures += 1;
                warn!("Watch on pod {} failed ({}/{}): {:#}", name, failures, MAX_WATCH_FAILURES, e);
                if failures >= MAX_WATCH_FAILURES {
                    return Ok(PodOutcome::WatchFailed(format!("{:#}", e)));
                }
                race(tokio::time::sleep(REWATCH_BACKOFF), cancel, deadline).await?;
                continue;
            }
        };

        loop {
            let event = match race(events.next_event(), cancel, deadline).await? {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("Watch on pod {} ended, re-opening", name);
                    break;
                }
                Err(e) => {
                    warn!("Watch on pod {} broke: {:#}", name, e);
                    break;
                }
            };

            match event.event_type {
                WatchEventType::Deleted => return Ok(PodOutcome::Deleted),
                WatchEventType::Error => {
                    warn!(
                        "Watch on pod {} reported an error: {}",
                        name,
                        event.error_message().unwrap_or_default()
                    );
                    break;
                }
                WatchEventType::Added | WatchEventType::Modified => {
                    let Some(pod) = event.pod() else {
                        continue;
                    };
                    match pod.phase() {
                        PodPhase::Succeeded => return Ok(PodOutcome::Exited(0)),
                        PodPhase::Failed => {
                            let deadline_hit = pod
                                .status
                                .as_ref()
                                .is_some_and(|s| s.reason == "DeadlineExceeded");
                            if deadline_hit {
                                return Ok(PodOutcome::DeadlineExceeded);
                            }
                            return Ok(match pod.terminated_exit_code(MAIN_CONTAINER) {
                                Some(code) => PodOutcome::Exited(code),
                                None => PodOutcome::NeverRan(pod.failure_reason()),
                            });
                        }
                        phase => debug!("Pod {} is {:?}", name, phase),
                    }
                }
                WatchEventType::Bookmark | WatchEventType::Unknown => {}
            }
        }

        race(tokio::time::sleep(REWATCH_BACKOFF), cancel, deadline).await?;
    }
}
