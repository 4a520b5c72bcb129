// ABOUTME: State machine for one user interaction with a remote processing tool
// ABOUTME: Drives upload, polling and retrieval and discards responses from superseded jobs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    Job, JobChannel, JobInput, JobState, PollEvent, PollLoop, PollSettings, ResultRetriever,
    SubmitRequest, Submission,
};
use crate::error::{InputError, JobError};
use crate::session::{Session, SessionProvider};
use crate::tools::{Identity, Tool};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerSettings {
    pub poll: PollSettings,
}

/// Owns the `JobState` of a single tool surface.
///
/// Cloning yields another handle to the same controller. Every asynchronous
/// continuation carries the generation it was started under and is dropped if
/// `submit` or `reset` bumped it in the meantime.
#[derive(Clone)]
pub struct JobController {
    shared: Arc<Shared>,
}

struct Shared {
    tool: &'static Tool,
    channel: Arc<dyn JobChannel>,
    sessions: Arc<dyn SessionProvider>,
    settings: ControllerSettings,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<JobState>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    state: JobState,
    poller: Option<PollLoop>,
    task: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_work(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl JobController {
    pub fn new(
        tool: &'static Tool,
        channel: Arc<dyn JobChannel>,
        sessions: Arc<dyn SessionProvider>,
        settings: ControllerSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            shared: Arc::new(Shared {
                tool,
                channel,
                sessions,
                settings,
                inner: Mutex::new(Inner::default()),
                state_tx,
            }),
        }
    }

    pub fn tool(&self) -> &'static Tool {
        self.shared.tool
    }

    pub fn state(&self) -> JobState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.shared.state_tx.subscribe()
    }

    /// Starts a job for `input`.
    ///
    /// Rejected without any state change when the session is unresolved, the
    /// tool needs a signed-in user and there is none, the input is missing or
    /// of the wrong type, or a job is still in progress. Must be called from
    /// within a tokio runtime.
    pub fn submit(&self, input: JobInput) -> Result<(), InputError> {
        let shared = &self.shared;
        let tool = shared.tool;

        let requester_id = shared.resolve_requester()?;
        shared.validate(&input)?;

        let mut inner = shared.lock();
        if inner.state.is_busy() {
            return Err(InputError::Busy);
        }

        inner.cancel_work();
        inner.generation += 1;
        let generation = inner.generation;

        let filename = input.filename.clone();
        info!(
            "Submitting {} for {} ({} bytes)",
            filename,
            tool.kind,
            input.bytes.len()
        );
        shared.set_state(
            &mut inner,
            JobState::Uploading {
                kind: tool.kind,
                input: filename.clone(),
            },
        );

        let request = SubmitRequest {
            tool,
            input,
            requester_id: requester_id.clone(),
        };
        let task = tokio::spawn(
            shared
                .clone()
                .upload(generation, request, filename, requester_id),
        );
        inner.task = Some(task);

        Ok(())
    }

    /// Cancels whatever is in flight and returns to `Idle`. Always allowed.
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        inner.cancel_work();
        inner.generation += 1;
        if inner.state != JobState::Idle {
            info!("Resetting {} job from {}", shared.tool.kind, inner.state.name());
        }
        shared.set_state(&mut inner, JobState::Idle);
    }

    /// Waits until the controller is no longer uploading, polling or retrieving.
    pub async fn wait_until_settled(&self) -> JobState {
        let mut rx = self.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if !state.is_busy() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, next: JobState) {
        if inner.state != next {
            debug!(
                "{} job: {} -> {}",
                self.tool.kind,
                inner.state.name(),
                next.name()
            );
        }
        inner.state = next.clone();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn resolve_requester(&self) -> Result<Option<String>, InputError> {
        match self.sessions.session() {
            Session::Pending => Err(InputError::SessionPending),
            Session::Anonymous => match self.tool.identity {
                Identity::Required => Err(InputError::NotSignedIn),
                Identity::Optional => Ok(None),
            },
            Session::Authenticated { requester_id } => Ok(Some(requester_id)),
        }
    }

    fn validate(&self, input: &JobInput) -> Result<(), InputError> {
        if input.filename.trim().is_empty() {
            return Err(InputError::NoFile);
        }
        if input.bytes.is_empty() {
            return Err(InputError::EmptyFile(input.filename.clone()));
        }
        let content_type = input.resolved_content_type();
        if !self.tool.accepts(&content_type) {
            return Err(InputError::UnsupportedType {
                expected: self.tool.accepts_label.to_string(),
                actual: content_type,
            });
        }
        Ok(())
    }

    async fn upload(
        self: Arc<Self>,
        generation: u64,
        request: SubmitRequest,
        input: String,
        requester_id: Option<String>,
    ) {
        let outcome = self.channel.submit_job(request).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("Discarding upload response for a superseded {} job", self.tool.kind);
            return;
        }

        match outcome {
            Ok(Submission::Accepted(id)) if self.tool.is_polled() => {
                info!("{} job {} accepted, waiting for completion", self.tool.kind, id);
                let job = Job {
                    id: id.clone(),
                    kind: self.tool.kind,
                    input,
                    requester_id,
                };
                self.set_state(
                    &mut inner,
                    JobState::Polling {
                        job,
                        polls: 0,
                        detail: None,
                    },
                );

                let weak = Arc::downgrade(&self);
                let poller = PollLoop::start(
                    self.channel.clone(),
                    self.tool,
                    id,
                    self.settings.poll,
                    move |event| Shared::on_poll_event(&weak, generation, event),
                );
                if let Some(previous) = inner.poller.replace(poller) {
                    previous.cancel();
                }
            }
            Ok(Submission::Accepted(id)) => {
                warn!("{} returned job id {} for a direct request", self.tool.label, id);
                self.set_state(
                    &mut inner,
                    JobState::Failed {
                        job: None,
                        error: JobError::Decode(format!(
                            "{} answered with a job id instead of a result",
                            self.tool.label
                        )),
                    },
                );
            }
            Ok(Submission::Finished(result)) => {
                info!("{} of {} finished", self.tool.kind, input);
                self.set_state(&mut inner, JobState::Completed { job: None, result });
            }
            Err(error) => {
                warn!("Submitting {} for {} failed: {}", input, self.tool.kind, error);
                self.set_state(&mut inner, JobState::Failed { job: None, error });
            }
        }
    }

    fn on_poll_event(weak: &Weak<Shared>, generation: u64, event: PollEvent) {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        let mut inner = shared.lock();
        if inner.generation != generation {
            debug!("Discarding stale poll event for {} job", shared.tool.kind);
            return;
        }
        let JobState::Polling { job, detail, .. } = &inner.state else {
            debug!("Ignoring poll event outside of polling state");
            return;
        };
        let job = job.clone();
        let previous_detail = detail.clone();

        match event {
            PollEvent::Running { attempt, detail } => {
                let next = JobState::Polling {
                    job,
                    polls: attempt,
                    detail: detail.or(previous_detail),
                };
                shared.set_state(&mut inner, next);
            }
            PollEvent::Complete => {
                info!("{} job {} complete, fetching result", job.kind, job.id);
                inner.poller = None;
                shared.set_state(&mut inner, JobState::Retrieving { job: job.clone() });
                let task = tokio::spawn(shared.clone().retrieve(generation, job));
                inner.task = Some(task);
            }
            PollEvent::Failed(error) => {
                warn!("{} job {} failed: {}", job.kind, job.id, error);
                inner.poller = None;
                shared.set_state(
                    &mut inner,
                    JobState::Failed {
                        job: Some(job),
                        error,
                    },
                );
            }
        }
    }

    async fn retrieve(self: Arc<Self>, generation: u64, job: Job) {
        let retriever = ResultRetriever::new(self.channel.clone(), self.tool);
        let outcome = retriever.retrieve(&job).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("Discarding result of superseded job {}", job.id);
            return;
        }
        let next = match outcome {
            Ok(result) => JobState::Completed {
                job: Some(job),
                result,
            },
            Err(error) => JobState::Failed {
                job: Some(job),
                error,
            },
        };
        self.set_state(&mut inner, next);
    }
}
