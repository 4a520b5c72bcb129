// ABOUTME: Error types surfaced by the job controller and its network channel
// ABOUTME: Splits rejected input from failures of a job that was already started

use thiserror::Error;

/// Why a `submit` call was refused before any network request was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Still checking who is signed in, try again in a moment")]
    SessionPending,
    #[error("You must be logged in to use this feature")]
    NotSignedIn,
    #[error("No file selected")]
    NoFile,
    #[error("The selected file is empty: {0}")]
    EmptyFile(String),
    #[error("Please select a valid {expected} file (got {actual})")]
    UnsupportedType { expected: String, actual: String },
    #[error("A job is already in progress")]
    Busy,
}

/// Terminal failure of a job, stored on the `Failed` state.
///
/// `Display` is the human-readable message shown to the user, so variants
/// carrying a server message print it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Network failure or a non-success HTTP status.
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },
    /// The status endpoint reported `error` for the job.
    #[error("{0}")]
    Backend(String),
    /// The backend never reached a terminal status within the attempt ceiling.
    #[error("The job did not finish after {attempts} status checks")]
    PollTimeout { attempts: u32 },
    /// A success response whose body could not be understood.
    #[error("Unexpected response from the server: {0}")]
    Decode(String),
}

/// Coarse classification of a `JobError` for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Backend,
    Timeout,
}

impl JobError {
    pub fn transport(message: impl Into<String>) -> Self {
        JobError::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Transport { .. } | JobError::Decode(_) => FailureKind::Transport,
            JobError::Backend(_) => FailureKind::Backend,
            JobError::PollTimeout { .. } => FailureKind::Timeout,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            JobError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: format!("Failed to communicate with the server: {}", err),
        }
    }
}
