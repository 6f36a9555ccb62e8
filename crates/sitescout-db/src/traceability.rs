//! Lineage recording: search result → classification → saved business.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sitescout_core::{
    defaults, new_v7, truncate_chars, ClassificationTrace, ClassifierReply, DirectoryRepository,
    Error, LlmProcessingResult, LlmProcessingSession, LlmResultStatus, LlmSessionStatus,
    ProcessingCounts, Result, ResultTrace, SearchSessionRepository, SessionTrace, TraceRepository,
};

/// Audit truncation limits.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub prompt_chars: usize,
    pub response_chars: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            prompt_chars: defaults::PROMPT_AUDIT_CHARS,
            response_chars: defaults::RESPONSE_AUDIT_CHARS,
        }
    }
}

/// One classified hit to record.
#[derive(Debug, Clone)]
pub struct RecordResultRequest<'a> {
    pub search_result_id: Uuid,
    pub llm_session_id: Uuid,
    pub prompt: &'a str,
    pub raw_reply: &'a str,
    pub elapsed_ms: i64,
    /// 0-based position of the hit within its batch.
    pub batch_position: usize,
    /// Number of hits the reply covers.
    pub batch_size: usize,
    pub confidence_threshold: f64,
}

/// Persists the classification lineage graph.
#[derive(Clone)]
pub struct TraceabilityStore {
    sessions: Arc<dyn SearchSessionRepository>,
    trace: Arc<dyn TraceRepository>,
    directory: Arc<dyn DirectoryRepository>,
    config: TraceConfig,
}

impl TraceabilityStore {
    pub fn new(
        sessions: Arc<dyn SearchSessionRepository>,
        trace: Arc<dyn TraceRepository>,
        directory: Arc<dyn DirectoryRepository>,
    ) -> Self {
        Self {
            sessions,
            trace,
            directory,
            config: TraceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    /// Start a classification run over a search session (status `pending`).
    pub async fn create_llm_session(
        &self,
        session_id: Uuid,
        total_results: usize,
    ) -> Result<LlmProcessingSession> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(Error::NotFound(format!("search session {}", session_id)));
        }

        let session = LlmProcessingSession {
            id: new_v7(),
            session_id,
            total_results: total_results as i32,
            status: LlmSessionStatus::Pending,
            counts: ProcessingCounts::default(),
            extraction_quality: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.trace.insert_session(&session).await?;

        debug!(
            subsystem = "db",
            component = "trace",
            op = "create_llm_session",
            session_id = %session_id,
            llm_session_id = %session.id,
            hit_count = total_results,
            "Classification run created"
        );
        Ok(session)
    }

    pub async fn start_llm_session(&self, llm_session_id: Uuid) -> Result<()> {
        self.trace
            .set_session_status(llm_session_id, LlmSessionStatus::Processing)
            .await
    }

    fn base_row(
        &self,
        search_result_id: Uuid,
        llm_session_id: Uuid,
        prompt: &str,
        elapsed_ms: i64,
    ) -> LlmProcessingResult {
        let mut row = LlmProcessingResult::pending(search_result_id, llm_session_id);
        row.status = LlmResultStatus::Processing;
        row.prompt_excerpt = Some(truncate_chars(prompt, self.config.prompt_chars));
        row.processing_ms = elapsed_ms;
        row
    }

    /// Classify one hit from a raw classifier reply and persist the outcome.
    ///
    /// Parse failures become `error` rows. Accepted and rejected rows also
    /// mark the source hit processed; if that unit of work fails the row is
    /// rewritten as `error` with the persistence failure. Only a failure to
    /// create the row at all is returned as an error.
    pub async fn record_result(&self, req: RecordResultRequest<'_>) -> Result<LlmProcessingResult> {
        let mut row = self.base_row(
            req.search_result_id,
            req.llm_session_id,
            req.prompt,
            req.elapsed_ms,
        );
        row.response_excerpt = Some(truncate_chars(req.raw_reply, self.config.response_chars));

        self.trace
            .insert_result(&row)
            .await
            .map_err(|e| Error::Persistence(format!("insert classification row: {}", e)))?;

        match self.classify_row(&mut row, &req).await {
            Ok(()) => {
                if let Err(e) = self.trace.finalize_result(&row).await {
                    warn!(
                        subsystem = "db",
                        component = "trace",
                        op = "record_result",
                        llm_session_id = %req.llm_session_id,
                        error = %e,
                        "Finalising classification failed, recording as error"
                    );
                    row.status = LlmResultStatus::Error;
                    row.error_message = Some(format!("persistence failed: {}", e));
                    self.write_error_row(&row).await;
                }
            }
            Err(e) => {
                debug!(
                    subsystem = "db",
                    component = "trace",
                    op = "record_result",
                    llm_session_id = %req.llm_session_id,
                    error = %e,
                    "Classifier reply rejected"
                );
                row.status = LlmResultStatus::Error;
                row.error_message = Some(e.to_string());
                self.write_error_row(&row).await;
            }
        }
        Ok(row)
    }

    /// Record a hit whose batch failed before any reply could be parsed.
    pub async fn record_failure(
        &self,
        search_result_id: Uuid,
        llm_session_id: Uuid,
        prompt: &str,
        error_message: &str,
        elapsed_ms: i64,
    ) -> Result<LlmProcessingResult> {
        let mut row = self.base_row(search_result_id, llm_session_id, prompt, elapsed_ms);
        row.status = LlmResultStatus::Error;
        row.error_message = Some(error_message.to_string());

        self.trace
            .insert_result(&row)
            .await
            .map_err(|e| Error::Persistence(format!("insert classification row: {}", e)))?;
        Ok(row)
    }

    async fn classify_row(
        &self,
        row: &mut LlmProcessingResult,
        req: &RecordResultRequest<'_>,
    ) -> Result<()> {
        let reply = ClassifierReply::parse_strict(req.raw_reply)?;
        if req.batch_size > 1 {
            reply.validate_for_batch(req.batch_size)?;
        }

        let source = self
            .sessions
            .get_result(req.search_result_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search result {}", req.search_result_id)))?;

        let entry = reply
            .entry_for(&source.url, req.batch_position)
            .ok_or_else(|| Error::Classification("reply has no entry for hit".to_string()))?;

        row.is_company_website = Some(entry.is_company_website);
        row.confidence = Some(entry.confidence);
        row.company_name = entry.company_name.clone();
        row.website = Some(entry.website.clone());
        row.extracted_from = entry.extracted_from.clone();
        row.city = entry.city.clone();
        row.state_province = entry.state_province.clone();
        row.country = entry.country.clone();
        row.categories = entry.categories.clone();
        row.status = if entry.is_accepted(req.confidence_threshold) {
            LlmResultStatus::Accepted
        } else {
            LlmResultStatus::Rejected
        };
        Ok(())
    }

    async fn write_error_row(&self, row: &LlmProcessingResult) {
        if let Err(e) = self.trace.update_result(row).await {
            warn!(
                subsystem = "db",
                component = "trace",
                op = "write_error_row",
                llm_session_id = %row.llm_session_id,
                error = %e,
                "Could not persist error status for classification row"
            );
        }
    }

    /// Store final counts; extraction quality is derived from them.
    pub async fn complete_llm_session(
        &self,
        llm_session_id: Uuid,
        counts: ProcessingCounts,
    ) -> Result<LlmProcessingSession> {
        let quality = counts.extraction_quality();
        let session = self
            .trace
            .complete_session(llm_session_id, counts, quality)
            .await?;

        info!(
            subsystem = "db",
            component = "trace",
            op = "complete_llm_session",
            llm_session_id = %llm_session_id,
            accepted = counts.accepted,
            rejected = counts.rejected,
            errored = counts.errored,
            extraction_quality = quality,
            "Classification run completed"
        );
        Ok(session)
    }

    /// Attach a durably saved business to an accepted classification row.
    pub async fn link_saved_business(&self, llm_result_id: Uuid, business_id: Uuid) -> Result<()> {
        let row = self
            .trace
            .get_result(llm_result_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("llm processing result {}", llm_result_id)))?;
        if row.status != LlmResultStatus::Accepted {
            return Err(Error::Validation(format!(
                "classification {} is {}, only accepted rows link to a business",
                llm_result_id,
                row.status.as_str()
            )));
        }
        if self.directory.get(business_id).await?.is_none() {
            return Err(Error::NotFound(format!("business {}", business_id)));
        }
        self.trace.link_business(llm_result_id, business_id).await
    }

    pub async fn list_llm_sessions(&self, session_id: Uuid) -> Result<Vec<LlmProcessingSession>> {
        self.trace.list_sessions(session_id).await
    }

    /// Full nested lineage of a search session.
    pub async fn get_full_trace(&self, session_id: Uuid) -> Result<SessionTrace> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search session {}", session_id)))?;

        let llm_sessions = self.trace.list_sessions(session_id).await?;
        let results = self.sessions.list_results(session_id, false).await?;
        let rows = self.trace.list_results_for_search_session(session_id).await?;

        let business_ids: HashSet<Uuid> = rows.iter().filter_map(|r| r.business_id).collect();
        let mut businesses = HashMap::new();
        for id in business_ids {
            if let Some(entry) = self.directory.get(id).await? {
                businesses.insert(id, entry);
            }
        }

        let mut by_result: HashMap<Uuid, Vec<ClassificationTrace>> = HashMap::new();
        for row in rows {
            let saved_business = row.business_id.and_then(|id| businesses.get(&id).cloned());
            by_result
                .entry(row.search_result_id)
                .or_default()
                .push(ClassificationTrace {
                    result: row,
                    saved_business,
                });
        }

        let results = results
            .into_iter()
            .map(|search_result| ResultTrace {
                classifications: by_result.remove(&search_result.id).unwrap_or_default(),
                search_result,
            })
            .collect();

        Ok(SessionTrace {
            session,
            llm_sessions,
            results,
        })
    }
}
