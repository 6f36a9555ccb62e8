//! Core traits for sitescout abstractions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classification::ClassifierPrompt;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Storage for search sessions and their ranked hits.
#[async_trait]
pub trait SearchSessionRepository: Send + Sync {
    /// Insert `candidate` unless a session with the same fingerprint was
    /// created at or after `reuse_since`, in which case that session is
    /// returned instead. The check and the insert are atomic.
    ///
    /// Returns the session and whether it was reused.
    async fn create_or_reuse(
        &self,
        candidate: SearchSession,
        reuse_since: DateTime<Utc>,
    ) -> Result<(SearchSession, bool)>;

    /// Get a session by ID.
    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>>;

    /// Mark a session completed with its final totals.
    async fn complete(
        &self,
        id: Uuid,
        total_results: i32,
        successful_queries: i32,
        elapsed_ms: i64,
    ) -> Result<SearchSession>;

    /// Append hits after any existing ones, preserving order.
    ///
    /// Fails with `NotFound` if the session does not exist.
    async fn insert_hits(&self, session_id: Uuid, hits: &[SearchHit]) -> Result<Vec<SearchResult>>;

    /// Get a single search result.
    async fn get_result(&self, id: Uuid) -> Result<Option<SearchResult>>;

    /// List a session's results in rank order.
    async fn list_results(&self, session_id: Uuid, only_unprocessed: bool)
        -> Result<Vec<SearchResult>>;
}

/// Storage for classification runs and per-hit classification rows.
#[async_trait]
pub trait TraceRepository: Send + Sync {
    /// Insert a new classification run.
    async fn insert_session(&self, session: &LlmProcessingSession) -> Result<()>;

    /// Get a classification run by ID.
    async fn get_session(&self, id: Uuid) -> Result<Option<LlmProcessingSession>>;

    /// Update the status of a classification run.
    async fn set_session_status(&self, id: Uuid, status: LlmSessionStatus) -> Result<()>;

    /// Store final counts and mark a run completed.
    async fn complete_session(
        &self,
        id: Uuid,
        counts: ProcessingCounts,
        extraction_quality: f64,
    ) -> Result<LlmProcessingSession>;

    /// List runs over a search session, oldest first.
    async fn list_sessions(&self, search_session_id: Uuid) -> Result<Vec<LlmProcessingSession>>;

    /// Insert a classification row.
    async fn insert_result(&self, result: &LlmProcessingResult) -> Result<()>;

    /// Overwrite a classification row.
    async fn update_result(&self, result: &LlmProcessingResult) -> Result<()>;

    /// Overwrite a classification row and mark its source hit processed,
    /// as one unit of work.
    async fn finalize_result(&self, result: &LlmProcessingResult) -> Result<()>;

    /// Get a classification row by ID.
    async fn get_result(&self, id: Uuid) -> Result<Option<LlmProcessingResult>>;

    /// Attach a saved directory entry to a classification row.
    async fn link_business(&self, result_id: Uuid, business_id: Uuid) -> Result<()>;

    /// All classification rows for hits of a search session.
    async fn list_results_for_search_session(
        &self,
        search_session_id: Uuid,
    ) -> Result<Vec<LlmProcessingResult>>;
}

/// Storage for the business directory.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Create or merge-update by `entry.website`, which must be normalised.
    async fn upsert(&self, entry: &NewBusinessEntry) -> Result<UpsertOutcome>;

    /// Find an entry by normalised website.
    async fn find_by_website(&self, website: &str) -> Result<Option<BusinessDirectoryEntry>>;

    /// Get an entry by ID.
    async fn get(&self, id: Uuid) -> Result<Option<BusinessDirectoryEntry>>;

    /// List entries, most recently updated first.
    async fn list(&self, limit: usize) -> Result<Vec<BusinessDirectoryEntry>>;
}

/// Keyed store for background jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Get a job by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Insert or replace a job.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Delete a job. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// List jobs in creation order, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Classifier for one batch of hits, returning the raw reply text.
///
/// Validation of the reply is the caller's job; implementations only move
/// bytes to and from the model.
#[async_trait]
pub trait BatchClassifier: Send + Sync {
    async fn classify(&self, prompt: &ClassifierPrompt) -> Result<String>;

    /// Identifier recorded in logs.
    fn name(&self) -> &str;
}
