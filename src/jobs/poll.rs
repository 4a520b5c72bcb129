// ABOUTME: Cancellable loop that queries a job's status at a fixed cadence
// ABOUTME: Reports progress and exactly one terminal event, then disposes itself

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{JobChannel, JobId, JobStatus};
use crate::error::JobError;
use crate::tools::Tool;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One hour at the default cadence.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 720;

const UNKNOWN_BACKEND_ERROR: &str = "An unknown error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Status checks allowed before giving up; `0` polls until a terminal status.
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Running {
        attempt: u32,
        detail: Option<String>,
    },
    Complete,
    Failed(JobError),
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEvent::Running { .. })
    }
}

/// Handle to a running poll task.
///
/// A loop is single use: once it reported a terminal event or was cancelled
/// it never queries again. Dropping the handle cancels the loop.
pub struct PollLoop {
    job_id: JobId,
    disposed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollLoop {
    /// Spawns the loop on the current tokio runtime. The first query is sent
    /// one interval after start and the next one only after it resolved, so
    /// queries never overlap however slow the network is.
    pub fn start<F>(
        channel: Arc<dyn JobChannel>,
        tool: &'static Tool,
        job_id: JobId,
        settings: PollSettings,
        on_event: F,
    ) -> Self
    where
        F: Fn(PollEvent) + Send + Sync + 'static,
    {
        let disposed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(
            channel,
            tool,
            job_id.clone(),
            settings,
            disposed.clone(),
            on_event,
        ));

        Self {
            job_id,
            disposed,
            handle,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stops the loop. A query already in flight is dropped and its response,
    /// should it still arrive, is never reported.
    pub fn cancel(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("Cancelled status polling for job {}", self.job_id);
        }
        self.handle.abort();
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run<F>(
    channel: Arc<dyn JobChannel>,
    tool: &'static Tool,
    job_id: JobId,
    settings: PollSettings,
    disposed: Arc<AtomicBool>,
    on_event: F,
) where
    F: Fn(PollEvent) + Send + Sync + 'static,
{
    let mut attempts: u32 = 0;

    loop {
        tokio::time::sleep(settings.interval).await;
        if disposed.load(Ordering::SeqCst) {
            return;
        }

        attempts += 1;
        debug!("Checking {} job {} (attempt {})", tool.kind, job_id, attempts);
        let outcome = channel.query_status(tool, &job_id).await;

        if disposed.load(Ordering::SeqCst) {
            debug!(
                "Discarding status for job {} that arrived after cancellation",
                job_id
            );
            return;
        }

        let terminal = match outcome {
            Ok(report) => match report.status {
                JobStatus::Complete => PollEvent::Complete,
                JobStatus::Error => PollEvent::Failed(JobError::Backend(
                    report
                        .detail
                        .unwrap_or_else(|| UNKNOWN_BACKEND_ERROR.to_string()),
                )),
                JobStatus::Running => {
                    if settings.max_attempts > 0 && attempts >= settings.max_attempts {
                        warn!(
                            "Job {} still running after {} status checks, giving up",
                            job_id, attempts
                        );
                        PollEvent::Failed(JobError::PollTimeout { attempts })
                    } else {
                        on_event(PollEvent::Running {
                            attempt: attempts,
                            detail: report.detail,
                        });
                        continue;
                    }
                }
            },
            Err(e) => {
                warn!("Status check for job {} failed: {}", job_id, e);
                PollEvent::Failed(e)
            }
        };

        if !disposed.swap(true, Ordering::SeqCst) {
            on_event(terminal);
        }
        return;
    }
}
