// ABOUTME: Library root for the Audily media processing client
// ABOUTME: Exposes the job controller, the HTTP channel and supporting configuration

pub mod config;
pub mod error;
pub mod jobs;
pub mod remote;
pub mod session;
pub mod tools;

pub use config::ClientConfig;
pub use error::{FailureKind, InputError, JobError};
pub use jobs::{Job, JobController, JobId, JobInput, JobKind, JobState, ResultPayload};
pub use remote::RemoteClient;
pub use session::{Session, SessionProvider, StaticSession};
pub use tools::Tool;
