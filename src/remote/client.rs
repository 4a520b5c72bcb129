// ABOUTME: HTTP client for communicating with the media processing API
// ABOUTME: Handles uploads, status queries, result downloads and error classification

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::models::{ErrorBody, HistoryEntry, StatusResponse, SubmitResponse};
use crate::error::JobError;
use crate::jobs::{
    Artifact, JobChannel, JobId, ResultPayload, StatusReport, SubmitRequest, Submission,
};
use crate::tools::{Execution, ResultShape, Tool};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteClient {
    client: Client,
    api_base_url: String,
}

impl RemoteClient {
    pub fn new(api_base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn job_url(&self, path: &str, job_id: &JobId) -> String {
        format!(
            "{}{}/{}",
            self.api_base_url,
            path,
            urlencoding::encode(job_id.as_str())
        )
    }

    fn polled_paths(tool: &Tool) -> Result<(&'static str, &'static str), JobError> {
        match tool.execution {
            Execution::Polled {
                status_path,
                result_path,
            } => Ok((status_path, result_path)),
            Execution::Immediate => Err(JobError::Decode(format!(
                "{} has no status or result endpoint",
                tool.label
            ))),
        }
    }

    pub async fn fetch_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        let url = format!(
            "{}/api/history/{}",
            self.api_base_url,
            urlencoding::encode(user_id)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch history from the processing service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch history data ({}): {}", status, body);
        }

        let entries: Vec<HistoryEntry> = response
            .json()
            .await
            .context("Failed to parse history response")?;

        Ok(entries)
    }
}

#[async_trait]
impl JobChannel for RemoteClient {
    async fn submit_job(&self, request: SubmitRequest) -> Result<Submission, JobError> {
        let SubmitRequest {
            tool,
            input,
            requester_id,
        } = request;
        let url = self.url(tool.submit_path);
        let content_type = input.resolved_content_type();

        let file = Part::bytes(input.bytes)
            .file_name(input.filename)
            .mime_str(&content_type)?;
        let mut form = Form::new().part("file", file);
        for (key, value) in input.params {
            form = form.text(key, value);
        }
        if let Some(user_id) = requester_id {
            form = form.text("user_id", user_id);
        }

        debug!("POST {}", url);
        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(tool, response).await);
        }

        if tool.is_polled() {
            let body: SubmitResponse = response
                .json()
                .await
                .map_err(|e| JobError::Decode(format!("Failed to parse job response: {}", e)))?;
            if let Some(message) = &body.message {
                debug!("{} accepted: {}", tool.label, message);
            }
            Ok(Submission::Accepted(JobId::from(body.job_id)))
        } else {
            let artifact = read_artifact(tool, None, response).await?;
            Ok(Submission::Finished(ResultPayload::Artifact(artifact)))
        }
    }

    async fn query_status(&self, tool: &Tool, job_id: &JobId) -> Result<StatusReport, JobError> {
        let (status_path, _) = Self::polled_paths(tool)?;
        let url = self.job_url(status_path, job_id);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(tool, response).await);
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| JobError::Decode(format!("Failed to parse job status: {}", e)))?;

        Ok(StatusReport::from_wire(&body.status, body.detail))
    }

    async fn fetch_result(&self, tool: &Tool, job_id: &JobId) -> Result<ResultPayload, JobError> {
        let (_, result_path) = Self::polled_paths(tool)?;
        let url = self.job_url(result_path, job_id);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(tool, response).await);
        }

        match tool.result {
            ResultShape::Json => {
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| JobError::Decode(format!("Failed to parse result: {}", e)))?;
                Ok(ResultPayload::Inline(value))
            }
            ResultShape::Artifact { .. } => {
                let artifact = read_artifact(tool, Some(job_id), response).await?;
                Ok(ResultPayload::Artifact(artifact))
            }
        }
    }
}

/// Classifies a non-success response, preferring the server's `detail`.
async fn error_from_response(tool: &Tool, response: Response) -> JobError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message());

    JobError::Transport {
        status: Some(status.as_u16()),
        message: detail.unwrap_or_else(|| {
            format!("{} request failed with status {}", tool.label, status.as_u16())
        }),
    }
}

async fn read_artifact(
    tool: &Tool,
    job_id: Option<&JobId>,
    response: Response,
) -> Result<Artifact, JobError> {
    let headers = response.headers();
    let filename = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| tool.default_filename(job_id));
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let bytes = response.bytes().await?;

    Ok(Artifact {
        filename,
        content_type,
        bytes: bytes.to_vec(),
    })
}

/// Extracts a safe filename from a `Content-Disposition` header value.
/// `filename*` (RFC 5987) wins over `filename`; path components are stripped.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(header) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(value.trim())),
            "filename*" => {
                let value = unquote(value.trim());
                let encoded = value
                    .split_once("''")
                    .map(|(_, v)| v)
                    .unwrap_or(value.as_str());
                let decoded = urlencoding::decode_binary(encoded.as_bytes());
                extended = Some(String::from_utf8_lossy(&decoded).into_owned());
            }
            _ => {}
        }
    }

    extended
        .or(plain)
        .and_then(|name| {
            Path::new(&name.replace('\\', "/"))
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .filter(|name| !name.is_empty() && name != "..")
}

/// Splits header parameters on `;`, leaving separators inside quoted strings alone.
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(header[start..].trim());
    params
}

/// Strips surrounding quotes and resolves `\"`-style escapes of a quoted string.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobInput, JobStatus};
    use crate::tools::{ANALYSIS, CONVERSION, SEPARATION, SUBTITLING};
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> RemoteClient {
        RemoteClient::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = RemoteClient::new("https://api.example.com/", DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(client.unwrap().api_base_url(), "https://api.example.com");
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="stems.zip""#).as_deref(),
            Some("stems.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename*=utf-8''%E6%9B%B2.mp3").as_deref(),
            Some("曲.mp3")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_disposition_quoted_separators_and_bad_escapes() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="a;b.zip""#).as_deref(),
            Some("a;b.zip")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="say \"hi\".mp3"; size=3"#)
                .as_deref(),
            Some("say \"hi\".mp3")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename*=utf-8''a%+1.zip").as_deref(),
            Some("a%+1.zip")
        );
        assert_eq!(
            filename_from_disposition(
                r#"attachment; filename="fallback.zip"; filename*=UTF-8''stems%20v2.zip"#
            )
            .as_deref(),
            Some("stems v2.zip")
        );
    }

    #[tokio::test]
    async fn test_submit_polled_job() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/add-subtitle")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="file"; filename="clip.mp4""#.to_string()),
                Matcher::Regex(r#"name="user_id""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"accepted","job_id":"abc"}"#)
            .create_async()
            .await;

        let submission = client(&server)
            .submit_job(SubmitRequest {
                tool: &SUBTITLING,
                input: JobInput::new("clip.mp4", b"not really a video".to_vec()),
                requester_id: Some("u1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(submission, Submission::Accepted(JobId::from("abc")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_error_uses_server_detail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/analyze")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail":"Could not accept the request"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .submit_job(SubmitRequest {
                tool: &ANALYSIS,
                input: JobInput::new("song.mp3", b"abc".to_vec()),
                requester_id: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "Could not accept the request");
    }

    #[tokio::test]
    async fn test_submit_error_without_detail_is_generic() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/mp4-to-mp3")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = client(&server)
            .submit_job(SubmitRequest {
                tool: &CONVERSION,
                input: JobInput::new("clip.mp4", b"abc".to_vec()),
                requester_id: Some("u1".to_string()),
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Conversion request failed with status 502");
    }

    #[tokio::test]
    async fn test_direct_submit_returns_artifact() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/element_divide")
            .with_status(200)
            .with_header("content-type", "application/zip")
            .with_header("content-disposition", r#"attachment; filename="song_stems.zip""#)
            .with_body("PK")
            .create_async()
            .await;

        let submission = client(&server)
            .submit_job(SubmitRequest {
                tool: &SEPARATION,
                input: JobInput::new("song.mp3", b"abc".to_vec()),
                requester_id: None,
            })
            .await
            .unwrap();

        let Submission::Finished(ResultPayload::Artifact(artifact)) = submission else {
            panic!("expected an artifact");
        };
        assert_eq!(artifact.filename, "song_stems.zip");
        assert_eq!(artifact.content_type.as_deref(), Some("application/zip"));
        assert_eq!(artifact.bytes, b"PK".to_vec());
    }

    #[tokio::test]
    async fn test_query_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/subtitle-status/abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"processing","detail":"Burning subtitles"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/analysis-status/xyz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"error","detail":"decode failed"}"#)
            .create_async()
            .await;

        let client = client(&server);
        let report = client
            .query_status(&SUBTITLING, &JobId::from("abc"))
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Running);
        assert_eq!(report.detail.as_deref(), Some("Burning subtitles"));

        let report = client
            .query_status(&ANALYSIS, &JobId::from("xyz"))
            .await
            .unwrap();
        assert_eq!(report, StatusReport::error("decode failed"));
    }

    #[tokio::test]
    async fn test_status_http_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/analysis-status/abc")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail":"Invalid Job ID"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .query_status(&ANALYSIS, &JobId::from("abc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JobError::Transport {
                status: Some(400),
                message: "Invalid Job ID".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/analysis-result/abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"job_id":"abc","analysis":"A bright pop song"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/download-subtitled-video/abc")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body("mp4")
            .create_async()
            .await;

        let client = client(&server);
        let result = client
            .fetch_result(&ANALYSIS, &JobId::from("abc"))
            .await
            .unwrap();
        assert_eq!(result.analysis(), Some("A bright pop song"));

        let result = client
            .fetch_result(&SUBTITLING, &JobId::from("abc"))
            .await
            .unwrap();
        let artifact = result.artifact().unwrap();
        assert_eq!(artifact.filename, "subtitled_abc.mp4");
        assert_eq!(artifact.bytes, b"mp4".to_vec());
    }

    #[tokio::test]
    async fn test_direct_tool_has_no_status_endpoint() {
        let server = mockito::Server::new_async().await;
        let err = client(&server)
            .query_status(&SEPARATION, &JobId::from("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_history() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/history/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id":1,"operation_type":"mp4_to_mp3","source_filename":"clip.mp4",
                     "status":"completed","created_at":"2024-05-01T10:00:00"}]"#,
            )
            .create_async()
            .await;

        let entries = client(&server).fetch_history("u1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation_type, "mp4_to_mp3");
    }

    #[tokio::test]
    async fn test_ids_are_encoded_as_single_path_segments() {
        let mut server = mockito::Server::new_async().await;
        let history = server
            .mock("GET", "/api/history/a%3Fb")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
        let status = server
            .mock("GET", "/api/analysis-status/x%2Fy%23z")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"complete"}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert!(client.fetch_history("a?b").await.unwrap().is_empty());
        let report = client
            .query_status(&ANALYSIS, &JobId::from("x/y#z"))
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Complete);

        history.assert_async().await;
        status.assert_async().await;
    }
}
