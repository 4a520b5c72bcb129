// ABOUTME: Network contract used by the job controller
// ABOUTME: Single request/response operations with no retry or state of their own

use async_trait::async_trait;

use super::{JobId, JobInput, ResultPayload};
use crate::error::JobError;
use crate::tools::Tool;

#[derive(Debug)]
pub struct SubmitRequest {
    pub tool: &'static Tool,
    /// Moved into the upload and dropped once it is sent.
    pub input: JobInput,
    pub requester_id: Option<String>,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The backend queued the job and will report on it under this id.
    Accepted(JobId),
    /// The backend finished synchronously and returned the result inline.
    Finished(ResultPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn running(detail: Option<String>) -> Self {
        Self {
            status: JobStatus::Running,
            detail,
        }
    }

    pub fn complete() -> Self {
        Self {
            status: JobStatus::Complete,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            detail: Some(detail.into()),
        }
    }

    /// Interprets the wire status string. Only `complete` and `error` are
    /// terminal; `processing`, `running` and progress labels all mean running.
    pub fn from_wire(status: &str, detail: Option<String>) -> Self {
        let status = match status.trim().to_ascii_lowercase().as_str() {
            "complete" => JobStatus::Complete,
            "error" => JobStatus::Error,
            _ => JobStatus::Running,
        };
        let detail = detail.filter(|d| !d.trim().is_empty());
        Self { status, detail }
    }
}

#[async_trait]
pub trait JobChannel: Send + Sync {
    async fn submit_job(&self, request: SubmitRequest) -> Result<Submission, JobError>;

    async fn query_status(&self, tool: &Tool, job_id: &JobId) -> Result<StatusReport, JobError>;

    /// Fails when the result is missing or has expired.
    async fn fetch_result(&self, tool: &Tool, job_id: &JobId) -> Result<ResultPayload, JobError>;
}
