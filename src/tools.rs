// ABOUTME: Catalogue of the processing tools exposed by the media service
// ABOUTME: Routes, identity requirements, accepted inputs and result shapes per tool

use crate::jobs::{JobId, JobKind};

/// Prompt sent with an analysis request when the user gives none.
pub const DEFAULT_ANALYSIS_PROMPT: &str =
    "Analyze the lyrics, singing style and overall atmosphere of this song.";

/// Whether a tool may be used without a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Required,
    Optional,
}

/// What the result endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// JSON body kept as-is.
    Json,
    /// Binary download; `default_filename` is used when the response carries
    /// no `Content-Disposition`. `{job_id}` is substituted.
    Artifact { default_filename: &'static str },
}

/// How the backend runs the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Submit returns a job id; progress is polled and the result fetched separately.
    Polled {
        status_path: &'static str,
        result_path: &'static str,
    },
    /// Submit blocks until done and returns the artifact in the response body.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    pub kind: JobKind,
    pub label: &'static str,
    pub submit_path: &'static str,
    pub identity: Identity,
    /// MIME patterns; `type/*` matches any subtype.
    pub accepts: &'static [&'static str],
    pub accepts_label: &'static str,
    pub execution: Execution,
    pub result: ResultShape,
}

pub const ANALYSIS: Tool = Tool {
    kind: JobKind::Analysis,
    label: "Analysis",
    submit_path: "/api/analyze",
    identity: Identity::Optional,
    accepts: &["audio/*", "video/*"],
    accepts_label: "audio or video",
    execution: Execution::Polled {
        status_path: "/api/analysis-status",
        result_path: "/api/analysis-result",
    },
    result: ResultShape::Json,
};

pub const SUBTITLING: Tool = Tool {
    kind: JobKind::Subtitling,
    label: "Subtitle",
    submit_path: "/api/add-subtitle",
    identity: Identity::Required,
    accepts: &["video/*"],
    accepts_label: "video",
    execution: Execution::Polled {
        status_path: "/api/subtitle-status",
        result_path: "/api/download-subtitled-video",
    },
    result: ResultShape::Artifact {
        default_filename: "subtitled_{job_id}.mp4",
    },
};

pub const SEPARATION: Tool = Tool {
    kind: JobKind::Separation,
    label: "Separation",
    submit_path: "/api/element_divide",
    identity: Identity::Optional,
    accepts: &["audio/*", "video/*"],
    accepts_label: "audio or video",
    execution: Execution::Immediate,
    result: ResultShape::Artifact {
        default_filename: "separated_audio.zip",
    },
};

pub const CONVERSION: Tool = Tool {
    kind: JobKind::Conversion,
    label: "Conversion",
    submit_path: "/api/mp4-to-mp3",
    identity: Identity::Required,
    accepts: &["video/mp4"],
    accepts_label: "MP4",
    execution: Execution::Immediate,
    result: ResultShape::Artifact {
        default_filename: "converted.mp3",
    },
};

impl Tool {
    pub fn for_kind(kind: JobKind) -> &'static Tool {
        match kind {
            JobKind::Analysis => &ANALYSIS,
            JobKind::Subtitling => &SUBTITLING,
            JobKind::Separation => &SEPARATION,
            JobKind::Conversion => &CONVERSION,
        }
    }

    pub fn is_polled(&self) -> bool {
        matches!(self.execution, Execution::Polled { .. })
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        self.accepts.iter().any(|pattern| match pattern.strip_suffix("/*") {
            Some(top) => content_type
                .split_once('/')
                .is_some_and(|(t, _)| t == top),
            None => content_type == *pattern,
        })
    }

    /// Filename for an artifact whose response did not name one.
    pub fn default_filename(&self, job_id: Option<&JobId>) -> String {
        match self.result {
            ResultShape::Artifact { default_filename } => {
                let id = job_id.map(|id| id.as_str()).unwrap_or("result");
                default_filename.replace("{job_id}", id)
            }
            ResultShape::Json => match job_id {
                Some(id) => format!("{}.json", id),
                None => "result.json".to_string(),
            },
        }
    }
}
