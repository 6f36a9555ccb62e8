//! Batch classification delegated to the external compute endpoint.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use sitescout_core::{BatchClassifier, ClassifierPrompt, Error, JobStatus, JobType, Result};

use crate::external::ExternalJobSpec;
use crate::tracker::ExternalJobTracker;

/// Job type the endpoint runs for one batch.
pub const CLASSIFY_BATCH: &str = "classify_batch";

/// Classifies a batch by submitting it as an external job and waiting for it.
///
/// The job's result must be the classifier reply, either as a JSON string or
/// as the reply object itself; it is validated by the caller like any other
/// reply.
#[derive(Clone)]
pub struct DelegatedClassifier {
    tracker: ExternalJobTracker,
}

impl DelegatedClassifier {
    pub fn new(tracker: ExternalJobTracker) -> Self {
        Self { tracker }
    }
}

fn reply_text(result: JsonValue) -> Result<String> {
    match result {
        JsonValue::String(text) => Ok(text),
        JsonValue::Null => Err(Error::Classification(
            "delegated job completed without a result".to_string(),
        )),
        other => Ok(other.to_string()),
    }
}

#[async_trait]
impl BatchClassifier for DelegatedClassifier {
    async fn classify(&self, prompt: &ClassifierPrompt) -> Result<String> {
        let spec = ExternalJobSpec {
            job_type: CLASSIFY_BATCH.to_string(),
            payload: json!({
                "system": prompt.system,
                "user": prompt.user,
                "request": prompt.request,
            }),
        };
        let job = self
            .tracker
            .submit(JobType::DelegatedClassification, spec)
            .await?;
        let done = self.tracker.wait_for_completion(job.id).await?;

        debug!(
            subsystem = "jobs",
            component = "delegated",
            op = "classify",
            job_id = %done.id,
            status = %done.status,
            "Delegated batch finished"
        );

        match done.status {
            JobStatus::Completed => reply_text(done.result.unwrap_or(JsonValue::Null)),
            _ => Err(Error::Classification(format!(
                "delegated classification failed: {}",
                done.error.unwrap_or_else(|| "unknown error".to_string())
            ))),
        }
    }

    fn name(&self) -> &str {
        "delegated"
    }
}
