// ABOUTME: Scripted in-memory JobChannel used by the controller and poll loop tests
// ABOUTME: Responses are queued per operation and may be delayed on the tokio clock

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{JobChannel, JobId, ResultPayload, StatusReport, SubmitRequest, Submission};
use crate::error::JobError;
use crate::tools::Tool;

pub(crate) struct Scripted<T> {
    delay: Duration,
    value: Result<T, JobError>,
}

impl<T> Scripted<T> {
    pub(crate) fn now(value: Result<T, JobError>) -> Self {
        Self {
            delay: Duration::ZERO,
            value,
        }
    }

    pub(crate) fn after(delay: Duration, value: Result<T, JobError>) -> Self {
        Self { delay, value }
    }
}

/// Decrements the in-flight counter even when the query future is dropped.
struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct ScriptedChannel {
    submits: Mutex<VecDeque<Scripted<Submission>>>,
    statuses: Mutex<VecDeque<Scripted<StatusReport>>>,
    results: Mutex<VecDeque<Scripted<ResultPayload>>>,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
    result_calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    requests: Mutex<Vec<(String, Option<String>, usize)>>,
    queried: Mutex<Vec<JobId>>,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_submit(&self, scripted: Scripted<Submission>) {
        self.submits.lock().unwrap().push_back(scripted);
    }

    pub(crate) fn push_status(&self, scripted: Scripted<StatusReport>) {
        self.statuses.lock().unwrap().push_back(scripted);
    }

    pub(crate) fn push_result(&self, scripted: Scripted<ResultPayload>) {
        self.results.lock().unwrap().push_back(scripted);
    }

    pub(crate) fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn result_calls(&self) -> u32 {
        self.result_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `(filename, requester_id, byte count)` of every upload.
    pub(crate) fn requests(&self) -> Vec<(String, Option<String>, usize)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn queried(&self) -> Vec<JobId> {
        self.queried.lock().unwrap().clone()
    }

    async fn play<T>(
        scripted: Option<Scripted<T>>,
        fallback: impl FnOnce() -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        match scripted {
            Some(Scripted { delay, value }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                value
            }
            None => fallback(),
        }
    }
}

#[async_trait]
impl JobChannel for ScriptedChannel {
    async fn submit_job(&self, request: SubmitRequest) -> Result<Submission, JobError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((
            request.input.filename.clone(),
            request.requester_id.clone(),
            request.input.bytes.len(),
        ));
        let next = self.submits.lock().unwrap().pop_front();
        Self::play(next, || Ok(Submission::Accepted(JobId::from("job-1")))).await
    }

    async fn query_status(&self, _tool: &Tool, job_id: &JobId) -> Result<StatusReport, JobError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.queried.lock().unwrap().push(job_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let next = self.statuses.lock().unwrap().pop_front();
        Self::play(next, || Ok(StatusReport::running(None))).await
    }

    async fn fetch_result(&self, _tool: &Tool, job_id: &JobId) -> Result<ResultPayload, JobError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop_front();
        let id = job_id.to_string();
        Self::play(next, move || {
            Ok(ResultPayload::Inline(
                serde_json::json!({ "job_id": id, "analysis": "" }),
            ))
        })
        .await
    }
}
