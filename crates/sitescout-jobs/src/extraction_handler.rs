//! SearchExtractionHandler: classify a recorded search session and write
//! qualifying businesses to the directory, recording lineage as it goes.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use sitescout_core::{
    normalize_website, ChainProcessing, ClassificationRequest, ClassifiedBusiness, Error, JobType,
    LlmResultStatus, ProcessingCounts, Result, SearchResult,
};
use sitescout_db::{RecordResultRequest, RecorderConfig, Repositories, TraceabilityStore};
use sitescout_inference::{BatchObserver, BatchOutcome, ExtractionPipeline};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Payload of a `search_extraction` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionPayload {
    pub session_id: Uuid,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Preview the directory write instead of performing it.
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides the pipeline's confidence threshold.
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Records every batch in the lineage store and reports job progress.
struct TraceObserver<'a> {
    trace: &'a TraceabilityStore,
    ctx: &'a JobContext,
    results: &'a [SearchResult],
    llm_session_id: Uuid,
    threshold: f64,
    state: Mutex<ObservedRows>,
}

#[derive(Default)]
struct ObservedRows {
    counts: ProcessingCounts,
    /// (normalised website, classification row id) of accepted rows.
    accepted: Vec<(String, Uuid)>,
}

impl<'a> TraceObserver<'a> {
    fn tally(&self, status: LlmResultStatus, website: Option<&str>, row_id: Uuid) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match status {
            LlmResultStatus::Accepted => {
                state.counts.accepted += 1;
                if let Some(site) = website.and_then(normalize_website) {
                    state.accepted.push((site, row_id));
                }
            }
            LlmResultStatus::Rejected => state.counts.rejected += 1,
            _ => state.counts.errored += 1,
        }
    }
}

#[async_trait]
impl<'a> BatchObserver for TraceObserver<'a> {
    async fn on_batch(&self, outcome: &BatchOutcome, total_hits: usize) -> Result<()> {
        let prompt = outcome.prompt.audit_text();
        let batch_size = outcome.hit_count();

        for position in 0..batch_size {
            let Some(source) = self.results.get(outcome.offset + position) else {
                continue;
            };

            let recorded = match (&outcome.raw_reply, &outcome.error) {
                (Some(raw), _) => {
                    self.trace
                        .record_result(RecordResultRequest {
                            search_result_id: source.id,
                            llm_session_id: self.llm_session_id,
                            prompt: &prompt,
                            raw_reply: raw,
                            elapsed_ms: outcome.elapsed_ms,
                            batch_position: position,
                            batch_size,
                            confidence_threshold: self.threshold,
                        })
                        .await
                }
                (None, error) => {
                    let message = error.as_deref().unwrap_or("classifier returned no reply");
                    self.trace
                        .record_failure(
                            source.id,
                            self.llm_session_id,
                            &prompt,
                            message,
                            outcome.elapsed_ms,
                        )
                        .await
                }
            };

            match recorded {
                Ok(row) => self.tally(row.status, row.website.as_deref(), row.id),
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "extraction",
                        op = "record",
                        search_result_id = %source.id,
                        error = %e,
                        "Could not record classification"
                    );
                    self.state
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .counts
                        .errored += 1;
                }
            }
        }

        report_progress(self.ctx, outcome, total_hits).await;
        Ok(())
    }
}

/// Progress only. Used for dry runs, which must leave storage untouched.
struct ProgressObserver<'a> {
    ctx: &'a JobContext,
}

#[async_trait]
impl<'a> BatchObserver for ProgressObserver<'a> {
    async fn on_batch(&self, outcome: &BatchOutcome, total_hits: usize) -> Result<()> {
        report_progress(self.ctx, outcome, total_hits).await;
        Ok(())
    }
}

async fn report_progress(ctx: &JobContext, outcome: &BatchOutcome, total_hits: usize) {
    let done = (outcome.offset + outcome.hit_count()) as u64;
    ctx.update_progress(
        done,
        total_hits as u64,
        Some(&format!("classified {} of {} hits", done, total_hits)),
    )
    .await;
}

fn chain_processing(classified: &[ClassifiedBusiness], counts: ProcessingCounts) -> ChainProcessing {
    let company_websites = classified.iter().filter(|b| b.is_company_website).count() as u32;
    ChainProcessing {
        total_processed: counts.total(),
        company_websites,
        directories: classified.len() as u32 - company_websites,
        extraction_quality: counts.extraction_quality(),
    }
}

/// Runs the extraction pipeline over a recorded search session.
pub struct SearchExtractionHandler {
    repos: Repositories,
    pipeline: ExtractionPipeline,
}

impl SearchExtractionHandler {
    pub fn new(repos: Repositories, pipeline: ExtractionPipeline) -> Self {
        Self { repos, pipeline }
    }

    async fn run(&self, ctx: &JobContext, payload: ExtractionPayload) -> Result<serde_json::Value> {
        let pipeline = match payload.threshold {
            Some(t) => self.pipeline.with_threshold(t),
            None => self.pipeline.clone(),
        };
        let threshold = pipeline.config().confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "confidence threshold {} outside [0, 1]",
                threshold
            )));
        }
        let trace = self.repos.traceability();
        let writer = self.repos.directory_writer();

        let session = self
            .repos
            .recorder(RecorderConfig::default())
            .get_session(payload.session_id)
            .await?;
        let results = self.repos.sessions.list_results(session.id, true).await?;
        if results.is_empty() {
            info!(
                subsystem = "jobs",
                component = "extraction",
                session_id = %session.id,
                "No unprocessed results"
            );
            return Ok(json!({
                "sessionId": session.id,
                "llmSessionId": null,
                "directoryWrite": null,
            }));
        }

        let request = ClassificationRequest {
            industry: payload.industry.clone().or_else(|| session.industry.clone()),
            location: payload.location.clone().or_else(|| session.location.clone()),
            hits: results.iter().map(SearchResult::to_hit).collect(),
        };

        if payload.dry_run {
            let observer = ProgressObserver { ctx };
            let report = pipeline.run(&request, Some(&observer)).await?;
            let mut write = writer.dry_run(&report.classified, threshold).await;
            write.chain_processing = Some(chain_processing(&report.classified, report.counts));

            info!(
                subsystem = "jobs",
                component = "extraction",
                job_id = %ctx.job_id(),
                session_id = %session.id,
                saved = write.saved,
                skipped = write.skipped,
                dry_run = true,
                "Search extraction preview finished"
            );
            return Ok(json!({
                "sessionId": session.id,
                "llmSessionId": null,
                "directoryWrite": write,
            }));
        }

        let llm = trace.create_llm_session(session.id, results.len()).await?;
        trace.start_llm_session(llm.id).await?;

        let observer = TraceObserver {
            trace: &trace,
            ctx,
            results: &results,
            llm_session_id: llm.id,
            threshold,
            state: Mutex::new(ObservedRows::default()),
        };
        let report = pipeline.run(&request, Some(&observer)).await?;
        let rows = observer.state.into_inner().unwrap_or_else(|p| p.into_inner());

        let mut write = writer.save(&report.classified, threshold).await;

        // A site created by one hit and updated by another shows up in both lists.
        let links: BTreeSet<(Uuid, Uuid)> = write
            .details
            .created
            .iter()
            .chain(write.details.updated.iter())
            .filter_map(|item| item.business_id.map(|id| (item.website.as_str(), id)))
            .flat_map(|(website, business_id)| {
                rows.accepted
                    .iter()
                    .filter(move |(site, _)| site == website)
                    .map(move |(_, row_id)| (*row_id, business_id))
            })
            .collect();
        for (row_id, business_id) in links {
            if let Err(e) = trace.link_saved_business(row_id, business_id).await {
                warn!(
                    subsystem = "jobs",
                    component = "extraction",
                    op = "link",
                    llm_result_id = %row_id,
                    business_id = %business_id,
                    error = %e,
                    "Could not link saved business"
                );
                write.errors.push(format!("link {}: {}", row_id, e));
            }
        }

        let completed = trace.complete_llm_session(llm.id, rows.counts).await?;
        let mut chain = chain_processing(&report.classified, rows.counts);
        chain.extraction_quality = completed.extraction_quality.unwrap_or_default();
        write.chain_processing = Some(chain);

        info!(
            subsystem = "jobs",
            component = "extraction",
            job_id = %ctx.job_id(),
            session_id = %session.id,
            llm_session_id = %llm.id,
            saved = write.saved,
            skipped = write.skipped,
            "Search extraction finished"
        );

        Ok(json!({
            "sessionId": session.id,
            "llmSessionId": llm.id,
            "directoryWrite": write,
        }))
    }
}

#[async_trait]
impl JobHandler for SearchExtractionHandler {
    fn job_type(&self) -> JobType {
        JobType::SearchExtraction
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ExtractionPayload = match serde_json::from_value(ctx.payload().clone()) {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(format!("Invalid extraction payload: {}", e)),
        };
        let session_id = payload.session_id;

        match self.run(&ctx, payload).await {
            Ok(result) => JobResult::Success(Some(result)),
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "extraction",
                    job_id = %ctx.job_id(),
                    session_id = %session_id,
                    error = %e,
                    "Search extraction failed"
                );
                JobResult::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let id = sitescout_core::new_v7();
        let payload: ExtractionPayload =
            serde_json::from_value(json!({ "sessionId": id })).unwrap();
        assert_eq!(payload.session_id, id);
        assert!(!payload.dry_run);
        assert!(payload.threshold.is_none());
    }

    #[test]
    fn test_payload_requires_session() {
        assert!(serde_json::from_value::<ExtractionPayload>(json!({"dryRun": true})).is_err());
    }
}
