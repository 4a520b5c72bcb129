// ABOUTME: Fetches the final artifact of a job the backend reported as complete
// ABOUTME: A completed job whose result cannot be fetched is reported as a failure

use std::sync::Arc;

use tracing::{info, warn};

use super::{Job, JobChannel, ResultPayload};
use crate::error::JobError;
use crate::tools::{ResultShape, Tool};

pub struct ResultRetriever {
    channel: Arc<dyn JobChannel>,
    tool: &'static Tool,
}

impl ResultRetriever {
    pub fn new(channel: Arc<dyn JobChannel>, tool: &'static Tool) -> Self {
        Self { channel, tool }
    }

    /// Issues exactly one result request for `job`.
    pub async fn retrieve(&self, job: &Job) -> Result<ResultPayload, JobError> {
        let payload = match self.channel.fetch_result(self.tool, &job.id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not fetch the result of {} job {}: {}", job.kind, job.id, e);
                return Err(e);
            }
        };

        match (&self.tool.result, &payload) {
            (ResultShape::Json, ResultPayload::Inline(_))
            | (ResultShape::Artifact { .. }, ResultPayload::Artifact(_)) => {}
            _ => {
                return Err(JobError::Decode(format!(
                    "{} result for job {} has an unexpected shape",
                    self.tool.label, job.id
                )))
            }
        }

        if let ResultPayload::Artifact(artifact) = &payload {
            info!(
                "Fetched {} ({} bytes) for job {}",
                artifact.filename,
                artifact.bytes.len(),
                job.id
            );
        } else {
            info!("Fetched result for {} job {}", job.kind, job.id);
        }

        Ok(payload)
    }
}
