//! Data model for the search → classification → directory lineage graph.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// SEARCH SESSIONS
// =============================================================================

/// Status of a search session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(Error::Serialization(format!(
                "unknown session status: {}",
                other
            ))),
        }
    }
}

/// One logical query execution, grouping its hits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchSession {
    pub id: Uuid,
    /// Normalised, de-duplicated, sorted query set.
    pub queries: Vec<String>,
    /// Digest of queries + industry + location used for duplicate detection.
    pub fingerprint: String,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub status: SessionStatus,
    pub total_results: i32,
    pub successful_queries: i32,
    pub elapsed_ms: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A raw hit as delivered by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    #[serde(alias = "link")]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// One recorded hit within a session, in rank order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: Uuid,
    pub session_id: Uuid,
    /// 1-based rank within the session.
    pub position: i32,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl SearchResult {
    /// The hit as it is presented to the classifier.
    pub fn to_hit(&self) -> SearchHit {
        SearchHit::new(&self.title, &self.url, &self.snippet)
    }
}

// =============================================================================
// LLM PROCESSING
// =============================================================================

/// Status of a classification run over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmSessionStatus {
    Pending,
    Processing,
    Completed,
}

impl LlmSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmSessionStatus::Pending => "pending",
            LlmSessionStatus::Processing => "processing",
            LlmSessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for LlmSessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(LlmSessionStatus::Pending),
            "processing" => Ok(LlmSessionStatus::Processing),
            "completed" => Ok(LlmSessionStatus::Completed),
            other => Err(Error::Serialization(format!(
                "unknown llm session status: {}",
                other
            ))),
        }
    }
}

/// Aggregate outcome counts of a classification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingCounts {
    pub accepted: u32,
    pub rejected: u32,
    pub errored: u32,
}

impl ProcessingCounts {
    pub fn total(&self) -> u32 {
        self.accepted + self.rejected + self.errored
    }

    /// accepted / (accepted + rejected + errored); zero for an empty run.
    pub fn extraction_quality(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.accepted as f64 / total as f64
    }
}

/// One classification run over a session's results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmProcessingSession {
    pub id: Uuid,
    pub session_id: Uuid,
    pub total_results: i32,
    pub status: LlmSessionStatus,
    pub counts: ProcessingCounts,
    pub extraction_quality: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a single hit's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmResultStatus {
    Pending,
    Processing,
    Accepted,
    Rejected,
    Error,
}

impl LlmResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmResultStatus::Pending => "pending",
            LlmResultStatus::Processing => "processing",
            LlmResultStatus::Accepted => "accepted",
            LlmResultStatus::Rejected => "rejected",
            LlmResultStatus::Error => "error",
        }
    }
}

impl FromStr for LlmResultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(LlmResultStatus::Pending),
            "processing" => Ok(LlmResultStatus::Processing),
            "accepted" => Ok(LlmResultStatus::Accepted),
            "rejected" => Ok(LlmResultStatus::Rejected),
            "error" => Ok(LlmResultStatus::Error),
            other => Err(Error::Serialization(format!(
                "unknown llm result status: {}",
                other
            ))),
        }
    }
}

/// The classification outcome for one search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmProcessingResult {
    pub id: Uuid,
    pub search_result_id: Uuid,
    pub llm_session_id: Uuid,
    pub status: LlmResultStatus,
    pub is_company_website: Option<bool>,
    pub confidence: Option<f64>,
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub extracted_from: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub country: Option<String>,
    pub categories: Vec<String>,
    /// Length-capped audit copy of the prompt.
    pub prompt_excerpt: Option<String>,
    /// Length-capped audit copy of the raw classifier reply.
    pub response_excerpt: Option<String>,
    pub error_message: Option<String>,
    pub processing_ms: i64,
    /// Directory entry saved from this classification, if any.
    pub business_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LlmProcessingResult {
    /// A blank `pending` row for the given search result and run.
    pub fn pending(search_result_id: Uuid, llm_session_id: Uuid) -> Self {
        Self {
            id: crate::new_v7(),
            search_result_id,
            llm_session_id,
            status: LlmResultStatus::Pending,
            is_company_website: None,
            confidence: None,
            company_name: None,
            website: None,
            extracted_from: None,
            city: None,
            state_province: None,
            country: None,
            categories: Vec::new(),
            prompt_excerpt: None,
            response_excerpt: None,
            error_message: None,
            processing_ms: 0,
            business_id: None,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// BUSINESS DIRECTORY
// =============================================================================

/// The canonical, de-duplicated record for a qualifying company website.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDirectoryEntry {
    pub id: Uuid,
    /// Normalised host; globally unique.
    pub website: String,
    pub company_name: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub country: Option<String>,
    pub categories: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming fields for a directory upsert.
///
/// `None` (and an empty category list) means "not supplied": an upsert never
/// overwrites a populated field with nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBusinessEntry {
    pub website: String,
    pub company_name: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl NewBusinessEntry {
    /// Merge the supplied fields over an existing entry.
    pub fn merge_into(&self, existing: &mut BusinessDirectoryEntry, now: DateTime<Utc>) {
        fn merge(slot: &mut Option<String>, incoming: &Option<String>) {
            if let Some(value) = incoming {
                if !value.trim().is_empty() {
                    *slot = Some(value.clone());
                }
            }
        }

        merge(&mut existing.company_name, &self.company_name);
        merge(&mut existing.city, &self.city);
        merge(&mut existing.state_province, &self.state_province);
        merge(&mut existing.country, &self.country);
        if !self.categories.is_empty() {
            existing.categories = self.categories.clone();
        }
        existing.active = true;
        existing.updated_at = now;
    }

    /// Build a fresh entry; `website` must already be normalised.
    pub fn into_entry(self, website: String, now: DateTime<Utc>) -> BusinessDirectoryEntry {
        BusinessDirectoryEntry {
            id: crate::new_v7(),
            website,
            company_name: self.company_name.filter(|s| !s.trim().is_empty()),
            city: self.city.filter(|s| !s.trim().is_empty()),
            state_province: self.state_province.filter(|s| !s.trim().is_empty()),
            country: self.country.filter(|s| !s.trim().is_empty()),
            categories: self.categories,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether an upsert created or updated a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

/// Result of a directory upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub id: Uuid,
    pub website: String,
}

/// One item in a directory write report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryItem {
    pub website: String,
    pub company_name: Option<String>,
    pub confidence: Option<f64>,
    /// Saved (or, in a preview, existing) directory id.
    pub business_id: Option<Uuid>,
    /// Why the item was skipped or failed.
    pub reason: Option<String>,
}

/// Per-bucket breakdown of a directory write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryWriteDetails {
    pub created: Vec<DirectoryItem>,
    pub updated: Vec<DirectoryItem>,
    pub skipped: Vec<DirectoryItem>,
    pub failed: Vec<DirectoryItem>,
}

/// Extraction counters attached to a write produced by an extraction job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProcessing {
    pub total_processed: u32,
    pub company_websites: u32,
    pub directories: u32,
    pub extraction_quality: f64,
}

/// Report of a directory write or preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryWriteResult {
    pub success: bool,
    pub dry_run: bool,
    pub saved: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
    pub details: DirectoryWriteDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_processing: Option<ChainProcessing>,
}

// =============================================================================
// TRACE GRAPH
// =============================================================================

/// One classification of a search result and the business it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationTrace {
    pub result: LlmProcessingResult,
    pub saved_business: Option<BusinessDirectoryEntry>,
}

/// A search result with every classification recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultTrace {
    pub search_result: SearchResult,
    pub classifications: Vec<ClassificationTrace>,
}

/// Full lineage of a search session for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTrace {
    pub session: SearchSession,
    pub llm_sessions: Vec<LlmProcessingSession>,
    pub results: Vec<ResultTrace>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Status of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed moves: queued → processing → {completed, failed}, plus
    /// queued → failed for a cancellation before dequeue.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Validation(format!("unknown job status: {}", other))),
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Classify a search session's hits and save qualifying businesses
    SearchExtraction,
    /// Classification batch delegated to the external compute endpoint
    DelegatedClassification,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SearchExtraction => "search_extraction",
            JobType::DelegatedClassification => "delegated_classification",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "search_extraction" => Ok(JobType::SearchExtraction),
            "delegated_classification" => Ok(JobType::DelegatedClassification),
            other => Err(Error::Validation(format!("unknown job type: {}", other))),
        }
    }
}

/// Progress of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub processed_units: u64,
    pub total_units: u64,
    /// 0–100; never decreases while the job is processing.
    pub percentage: f64,
    pub current_step: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub eta_ms: Option<u64>,
}

impl JobProgress {
    /// Record units done and recompute percentage and ETA.
    ///
    /// The ETA is elapsed-time-per-unit × remaining units. Percentage and
    /// processed units only move forward.
    pub fn advance(
        &mut self,
        processed_units: u64,
        total_units: u64,
        current_step: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.total_units = total_units;
        self.processed_units = processed_units.max(self.processed_units);
        if current_step.is_some() {
            self.current_step = current_step;
        }

        if total_units > 0 {
            let pct = (self.processed_units as f64 / total_units as f64 * 100.0).min(100.0);
            self.set_percentage(pct);
        }

        self.eta_ms = match self.start_time {
            Some(start) if self.processed_units > 0 => {
                let elapsed_ms = (now - start).num_milliseconds().max(0) as u64;
                let per_unit = elapsed_ms as f64 / self.processed_units as f64;
                let remaining = total_units.saturating_sub(self.processed_units);
                Some((per_unit * remaining as f64).round() as u64)
            }
            _ => None,
        };
    }

    /// Raise the percentage; lower values are ignored.
    pub fn set_percentage(&mut self, pct: f64) {
        let pct = pct.clamp(0.0, 100.0);
        if pct > self.percentage {
            self.percentage = pct;
        }
    }
}

/// Reference to work delegated to the external compute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalJobRef {
    pub external_id: String,
    pub poll_url: String,
    pub position: Option<u32>,
    pub eta_ms: Option<u64>,
}

/// A generic background unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    /// Set when the work runs on the external compute endpoint.
    pub external: Option<ExternalJobRef>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A new `queued` job.
    pub fn new(job_type: JobType, payload: JsonValue) -> Self {
        Self {
            id: crate::new_v7(),
            job_type,
            payload,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            result: None,
            error: None,
            external: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "invalid job transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        self.progress.start_time = Some(now);
        Ok(())
    }

    pub fn mark_completed(&mut self, result: Option<JsonValue>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        if result.is_some() {
            self.result = result;
        }
        self.progress.set_percentage(100.0);
        self.progress.eta_ms = Some(0);
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.progress.eta_ms = None;
        self.finished_at = Some(now);
        Ok(())
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl QueueStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = QueueStats::default();
        for job in jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        stats
    }
}
