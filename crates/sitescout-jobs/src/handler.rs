//! The handler seam between the worker loop and job-type specific code.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use sitescout_core::{Job, JobStatus, JobStore, JobType, Result};

use crate::manager::JobEvent;

/// What a handler sees of the job it is running.
#[derive(Clone)]
pub struct JobContext {
    /// Snapshot of the job as it was dequeued.
    pub job: Job,
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
}

impl JobContext {
    pub(crate) fn new(job: Job, store: Arc<dyn JobStore>, events: broadcast::Sender<JobEvent>) -> Self {
        Self { job, store, events }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Record progress; percentage and ETA are recomputed from the units.
    ///
    /// Progress only moves forward. Store failures are logged, never
    /// surfaced to the handler.
    pub async fn update_progress(&self, processed: u64, total: u64, step: Option<&str>) {
        if let Err(e) = self.try_update_progress(processed, total, step).await {
            warn!(
                subsystem = "jobs",
                component = "context",
                op = "update_progress",
                job_id = %self.job.id,
                error = %e,
                "Failed to persist job progress"
            );
        }
    }

    async fn try_update_progress(&self, processed: u64, total: u64, step: Option<&str>) -> Result<()> {
        let Some(mut job) = self.store.get(self.job.id).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Processing {
            return Ok(());
        }

        job.progress
            .advance(processed, total, step.map(String::from), Utc::now());
        self.store.put(&job).await?;

        let _ = self.events.send(JobEvent::JobProgress {
            job_id: job.id,
            percentage: job.progress.percentage,
            step: job.progress.current_step.clone(),
        });
        Ok(())
    }
}

/// Outcome reported back to the worker, which writes it to the job row.
#[derive(Debug)]
pub enum JobResult {
    /// Stored as the job's `result`.
    Success(Option<JsonValue>),
    /// Stored as the job's `error`.
    Failed(String),
}

/// Registered with the manager, one per job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Run the job to completion. Panics are caught by the worker.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}
