// ABOUTME: Job model and lifecycle state shared by the controller and the presentation layer
// ABOUTME: JobState is one exhaustive enum so impossible flag combinations cannot be expressed

pub mod channel;
pub mod controller;
pub mod poll;
pub mod retriever;

#[cfg(test)]
mod testing;

pub use channel::{JobChannel, JobStatus, StatusReport, SubmitRequest, Submission};
pub use controller::{ControllerSettings, JobController};
pub use poll::{PollEvent, PollLoop, PollSettings};
pub use retriever::ResultRetriever;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::JobError;

/// Opaque identifier assigned by the backend when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        JobId(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        JobId(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Analysis,
    Separation,
    Subtitling,
    Conversion,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobKind::Analysis => "analysis",
            JobKind::Separation => "separation",
            JobKind::Subtitling => "subtitling",
            JobKind::Conversion => "conversion",
        };
        f.write_str(name)
    }
}

/// A file picked by the user plus the tool parameters that go with it.
#[derive(Clone, Default)]
pub struct JobInput {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl fmt::Debug for JobInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInput")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("params", &self.params)
            .finish()
    }
}

impl JobInput {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            ..Default::default()
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::new(filename, bytes))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Explicit content type, else a guess from the file extension.
    pub fn resolved_content_type(&self) -> String {
        match &self.content_type {
            Some(ct) => ct.clone(),
            None => mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// One remote operation, as far as the client knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Filename of the uploaded source; the bytes themselves are not kept.
    pub input: String,
    pub requester_id: Option<String>,
}

/// A downloadable result.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Numbered variants tried before `save_to` gives up.
const MAX_NAME_SUFFIX: u32 = 999;

impl Artifact {
    /// Writes the artifact into `dir`, creating it if needed, and returns the
    /// path. An existing file is never replaced: `name.ext` becomes
    /// `name-1.ext`, `name-2.ext` and so on.
    pub async fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        for suffix in 0..=MAX_NAME_SUFFIX {
            let path = dir.join(numbered_name(&self.filename, suffix));
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            file.write_all(&self.bytes).await?;
            file.flush().await?;
            return Ok(path);
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "{} and {} numbered copies already exist in {}",
                self.filename,
                MAX_NAME_SUFFIX,
                dir.display()
            ),
        ))
    }
}

fn numbered_name(filename: &str, suffix: u32) -> String {
    if suffix == 0 {
        return filename.to_string();
    }
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stem, suffix),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Inline(serde_json::Value),
    Artifact(Artifact),
}

impl ResultPayload {
    /// Analysis text of an inline result, if it has one.
    pub fn analysis(&self) -> Option<&str> {
        match self {
            ResultPayload::Inline(value) => value.get("analysis").and_then(|v| v.as_str()),
            ResultPayload::Artifact(_) => None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            ResultPayload::Artifact(artifact) => Some(artifact),
            ResultPayload::Inline(_) => None,
        }
    }
}

/// Client-side view of the current job.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Uploading {
        kind: JobKind,
        input: String,
    },
    Polling {
        job: Job,
        /// `running` observations so far.
        polls: u32,
        detail: Option<String>,
    },
    Retrieving {
        job: Job,
    },
    Completed {
        /// `None` for tools that answer the upload with the result directly.
        job: Option<Job>,
        result: ResultPayload,
    },
    Failed {
        /// `None` when the failure happened before the backend assigned an id.
        job: Option<Job>,
        error: JobError,
    },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Uploading { .. } => "uploading",
            JobState::Polling { .. } => "polling",
            JobState::Retrieving { .. } => "retrieving",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            JobState::Polling { job, .. } | JobState::Retrieving { job } => Some(job),
            JobState::Completed { job, .. } | JobState::Failed { job, .. } => job.as_ref(),
            JobState::Idle | JobState::Uploading { .. } => None,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job().map(|job| &job.id)
    }

    pub fn result(&self) -> Option<&ResultPayload> {
        match self {
            JobState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// A request for this interaction is still outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            JobState::Uploading { .. } | JobState::Polling { .. } | JobState::Retrieving { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}
