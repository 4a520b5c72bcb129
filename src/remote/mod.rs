// ABOUTME: Remote media processing API module
// ABOUTME: HTTP implementation of the job channel plus the wire data structures

pub mod client;
pub mod models;

pub use client::{filename_from_disposition, RemoteClient, DEFAULT_REQUEST_TIMEOUT};
pub use models::{AnalysisResult, HistoryEntry};
