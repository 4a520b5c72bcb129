// ABOUTME: Data structures exchanged with the media processing API
// ABOUTME: Deserialized from the JSON bodies of submit, status, result and history calls

use serde::{Deserialize, Serialize};

/// Body of an accepted submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String, // "processing", "running", "complete", "error" or a progress label
    #[serde(default)]
    pub detail: Option<String>,
}

/// Error body of a non-success response. FastAPI puts a string here for
/// handled errors and a list of objects for validation failures.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            serde_json::Value::Null | serde_json::Value::String(_) => None,
            serde_json::Value::Array(items) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if messages.is_empty() {
                    None
                } else {
                    Some(messages.join("; "))
                }
            }
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: String,
    pub analysis: String,
}

/// One row of a user's operation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub operation_type: String,
    pub source_filename: String,
    pub status: String, // "started", "completed", "error: <reason>"
    pub created_at: String,
}

impl HistoryEntry {
    /// Status without the reason suffix the backend appends to errors.
    pub fn status_label(&self) -> &str {
        self.status.split(':').next().unwrap_or_default().trim()
    }
}
