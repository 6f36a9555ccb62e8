//! In-memory storage backend.
//!
//! Implements every repository trait over one shared state so that
//! cross-table units of work (a classification row plus its source hit's
//! `processed` flag) stay atomic. Used when no `DATABASE_URL` is configured
//! and throughout the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use sitescout_core::{
    new_v7, BusinessDirectoryEntry, DirectoryRepository, Error, Job, JobStatus, JobStore,
    LlmProcessingResult, LlmProcessingSession, LlmSessionStatus, NewBusinessEntry,
    ProcessingCounts, Result, SearchHit, SearchResult, SearchSession, SearchSessionRepository,
    SessionStatus, TraceRepository, UpsertAction, UpsertOutcome,
};

#[derive(Default)]
struct State {
    sessions: HashMap<Uuid, SearchSession>,
    results: HashMap<Uuid, SearchResult>,
    llm_sessions: HashMap<Uuid, LlmProcessingSession>,
    llm_results: HashMap<Uuid, LlmProcessingResult>,
    businesses: HashMap<Uuid, BusinessDirectoryEntry>,
    websites: HashMap<String, Uuid>,
    jobs: HashMap<Uuid, Job>,
    job_order: Vec<Uuid>,
}

/// In-memory implementation of all sitescout repositories.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// SEARCH SESSIONS
// =============================================================================

#[async_trait]
impl SearchSessionRepository for MemoryStore {
    async fn create_or_reuse(
        &self,
        candidate: SearchSession,
        reuse_since: DateTime<Utc>,
    ) -> Result<(SearchSession, bool)> {
        let mut state = self.state.write().await;

        let reusable = state
            .sessions
            .values()
            .filter(|s| s.fingerprint == candidate.fingerprint && s.created_at >= reuse_since)
            .max_by_key(|s| s.created_at)
            .cloned();
        if let Some(existing) = reusable {
            return Ok((existing, true));
        }

        state.sessions.insert(candidate.id, candidate.clone());
        self.record_write();
        Ok((candidate, false))
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn complete(
        &self,
        id: Uuid,
        total_results: i32,
        successful_queries: i32,
        elapsed_ms: i64,
    ) -> Result<SearchSession> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("search session {}", id)))?;
        session.status = SessionStatus::Completed;
        session.total_results = total_results;
        session.successful_queries = successful_queries;
        session.elapsed_ms = elapsed_ms;
        session.completed_at = Some(Utc::now());
        let updated = session.clone();
        self.record_write();
        Ok(updated)
    }

    async fn insert_hits(&self, session_id: Uuid, hits: &[SearchHit]) -> Result<Vec<SearchResult>> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&session_id) {
            return Err(Error::NotFound(format!("search session {}", session_id)));
        }

        let last_position = state
            .results
            .values()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.position)
            .max()
            .unwrap_or(0);

        let now = Utc::now();
        let inserted: Vec<SearchResult> = hits
            .iter()
            .enumerate()
            .map(|(offset, hit)| SearchResult {
                id: new_v7(),
                session_id,
                position: last_position + offset as i32 + 1,
                title: hit.title.clone(),
                url: hit.url.clone(),
                snippet: hit.snippet.clone(),
                processed: false,
                created_at: now,
            })
            .collect();

        for result in &inserted {
            state.results.insert(result.id, result.clone());
        }
        self.record_write();
        Ok(inserted)
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<SearchResult>> {
        Ok(self.state.read().await.results.get(&id).cloned())
    }

    async fn list_results(
        &self,
        session_id: Uuid,
        only_unprocessed: bool,
    ) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        let mut results: Vec<SearchResult> = state
            .results
            .values()
            .filter(|r| r.session_id == session_id && (!only_unprocessed || !r.processed))
            .cloned()
            .collect();
        results.sort_by_key(|r| r.position);
        Ok(results)
    }
}

// =============================================================================
// LINEAGE
// =============================================================================

#[async_trait]
impl TraceRepository for MemoryStore {
    async fn insert_session(&self, session: &LlmProcessingSession) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&session.session_id) {
            return Err(Error::NotFound(format!(
                "search session {}",
                session.session_id
            )));
        }
        state.llm_sessions.insert(session.id, session.clone());
        self.record_write();
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<LlmProcessingSession>> {
        Ok(self.state.read().await.llm_sessions.get(&id).cloned())
    }

    async fn set_session_status(&self, id: Uuid, status: LlmSessionStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .llm_sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("llm processing session {}", id)))?;
        session.status = status;
        self.record_write();
        Ok(())
    }

    async fn complete_session(
        &self,
        id: Uuid,
        counts: ProcessingCounts,
        extraction_quality: f64,
    ) -> Result<LlmProcessingSession> {
        let mut state = self.state.write().await;
        let session = state
            .llm_sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("llm processing session {}", id)))?;
        session.status = LlmSessionStatus::Completed;
        session.counts = counts;
        session.extraction_quality = Some(extraction_quality);
        session.completed_at = Some(Utc::now());
        let updated = session.clone();
        self.record_write();
        Ok(updated)
    }

    async fn list_sessions(&self, search_session_id: Uuid) -> Result<Vec<LlmProcessingSession>> {
        let state = self.state.read().await;
        let mut sessions: Vec<LlmProcessingSession> = state
            .llm_sessions
            .values()
            .filter(|s| s.session_id == search_session_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        Ok(sessions)
    }

    async fn insert_result(&self, result: &LlmProcessingResult) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.results.contains_key(&result.search_result_id) {
            return Err(Error::NotFound(format!(
                "search result {}",
                result.search_result_id
            )));
        }
        if !state.llm_sessions.contains_key(&result.llm_session_id) {
            return Err(Error::NotFound(format!(
                "llm processing session {}",
                result.llm_session_id
            )));
        }
        state.llm_results.insert(result.id, result.clone());
        self.record_write();
        Ok(())
    }

    async fn update_result(&self, result: &LlmProcessingResult) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .llm_results
            .get_mut(&result.id)
            .ok_or_else(|| Error::NotFound(format!("llm processing result {}", result.id)))?;
        *slot = result.clone();
        self.record_write();
        Ok(())
    }

    async fn finalize_result(&self, result: &LlmProcessingResult) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.llm_results.contains_key(&result.id) {
            return Err(Error::NotFound(format!("llm processing result {}", result.id)));
        }
        let source = state
            .results
            .get_mut(&result.search_result_id)
            .ok_or_else(|| Error::NotFound(format!("search result {}", result.search_result_id)))?;
        source.processed = true;
        state.llm_results.insert(result.id, result.clone());
        self.record_write();
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LlmProcessingResult>> {
        Ok(self.state.read().await.llm_results.get(&id).cloned())
    }

    async fn link_business(&self, result_id: Uuid, business_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state
            .llm_results
            .get_mut(&result_id)
            .ok_or_else(|| Error::NotFound(format!("llm processing result {}", result_id)))?;
        row.business_id = Some(business_id);
        self.record_write();
        Ok(())
    }

    async fn list_results_for_search_session(
        &self,
        search_session_id: Uuid,
    ) -> Result<Vec<LlmProcessingResult>> {
        let state = self.state.read().await;
        let mut rows: Vec<(i32, LlmProcessingResult)> = state
            .llm_results
            .values()
            .filter_map(|r| {
                state
                    .results
                    .get(&r.search_result_id)
                    .filter(|s| s.session_id == search_session_id)
                    .map(|s| (s.position, r.clone()))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.created_at.cmp(&b.1.created_at)));
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

#[async_trait]
impl DirectoryRepository for MemoryStore {
    async fn upsert(&self, entry: &NewBusinessEntry) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(id) = state.websites.get(&entry.website).copied() {
            if let Some(existing) = state.businesses.get_mut(&id) {
                entry.merge_into(existing, now);
                self.record_write();
                return Ok(UpsertOutcome {
                    action: UpsertAction::Updated,
                    id,
                    website: entry.website.clone(),
                });
            }
        }

        let created = entry.clone().into_entry(entry.website.clone(), now);
        let id = created.id;
        state.websites.insert(created.website.clone(), id);
        state.businesses.insert(id, created);
        self.record_write();
        Ok(UpsertOutcome {
            action: UpsertAction::Created,
            id,
            website: entry.website.clone(),
        })
    }

    async fn find_by_website(&self, website: &str) -> Result<Option<BusinessDirectoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .websites
            .get(website)
            .and_then(|id| state.businesses.get(id))
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BusinessDirectoryEntry>> {
        Ok(self.state.read().await.businesses.get(&id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<BusinessDirectoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<BusinessDirectoryEntry> = state.businesses.values().cloned().collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

// =============================================================================
// JOBS
// =============================================================================

#[async_trait]
impl JobStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn put(&self, job: &Job) -> Result<()> {
        let mut state = self.state.write().await;
        if state.jobs.insert(job.id, job.clone()).is_none() {
            state.job_order.push(job.id);
        }
        self.record_write();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.jobs.remove(&id).is_some();
        if existed {
            state.job_order.retain(|j| *j != id);
            self.record_write();
        }
        Ok(existed)
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .job_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use sitescout_core::{JobType, LlmResultStatus};

    fn candidate(fingerprint: &str) -> SearchSession {
        SearchSession {
            id: new_v7(),
            queries: vec!["plumbers".into()],
            fingerprint: fingerprint.into(),
            industry: None,
            location: None,
            status: SessionStatus::Pending,
            total_results: 0,
            successful_queries: 0,
            elapsed_ms: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_or_reuse_within_window() {
        let store = MemoryStore::new();
        let since = Utc::now() - Duration::seconds(60);

        let (first, reused) = store.create_or_reuse(candidate("fp"), since).await.unwrap();
        assert!(!reused);
        let (second, reused) = store.create_or_reuse(candidate("fp"), since).await.unwrap();
        assert!(reused);
        assert_eq!(first.id, second.id);

        let (other, reused) = store.create_or_reuse(candidate("fp2"), since).await.unwrap();
        assert!(!reused);
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn test_create_outside_window() {
        let store = MemoryStore::new();
        let mut old = candidate("fp");
        old.created_at = Utc::now() - Duration::seconds(120);
        store
            .create_or_reuse(old.clone(), old.created_at)
            .await
            .unwrap();

        let since = Utc::now() - Duration::seconds(60);
        let (fresh, reused) = store.create_or_reuse(candidate("fp"), since).await.unwrap();
        assert!(!reused);
        assert_ne!(fresh.id, old.id);
    }

    #[tokio::test]
    async fn test_insert_hits_appends_positions() {
        let store = MemoryStore::new();
        let (session, _) = store
            .create_or_reuse(candidate("fp"), Utc::now())
            .await
            .unwrap();

        let hits = vec![SearchHit::new("a", "a.com", ""), SearchHit::new("b", "b.com", "")];
        store.insert_hits(session.id, &hits).await.unwrap();
        let more = store
            .insert_hits(session.id, &[SearchHit::new("c", "c.com", "")])
            .await
            .unwrap();
        assert_eq!(more[0].position, 3);

        let listed = store.list_results(session.id, false).await.unwrap();
        let titles: Vec<_> = listed.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_insert_hits_unknown_session() {
        let store = MemoryStore::new();
        let err = store
            .insert_hits(new_v7(), &[SearchHit::new("a", "a.com", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_marks_source_processed() {
        let store = MemoryStore::new();
        let (session, _) = store
            .create_or_reuse(candidate("fp"), Utc::now())
            .await
            .unwrap();
        let hits = store
            .insert_hits(session.id, &[SearchHit::new("a", "a.com", "")])
            .await
            .unwrap();

        let run = LlmProcessingSession {
            id: new_v7(),
            session_id: session.id,
            total_results: 1,
            status: LlmSessionStatus::Pending,
            counts: ProcessingCounts::default(),
            extraction_quality: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        store.insert_session(&run).await.unwrap();

        let mut row = LlmProcessingResult::pending(hits[0].id, run.id);
        store.insert_result(&row).await.unwrap();
        row.status = LlmResultStatus::Rejected;
        store.finalize_result(&row).await.unwrap();

        let unprocessed = store.list_results(session.id, true).await.unwrap();
        assert!(unprocessed.is_empty());
        let stored = TraceRepository::get_result(&store, row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmResultStatus::Rejected);
    }

    #[tokio::test]
    async fn test_job_list_preserves_insertion_order() {
        let store = MemoryStore::new();
        let jobs: Vec<Job> = (0..3)
            .map(|i| Job::new(JobType::SearchExtraction, json!({ "n": i })))
            .collect();
        for job in &jobs {
            store.put(job).await.unwrap();
        }
        // Re-putting must not move a job in the order.
        store.put(&jobs[0]).await.unwrap();

        let listed = JobStore::list(&store, None).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|j| j.id).collect();
        assert_eq!(ids, jobs.iter().map(|j| j.id).collect::<Vec<_>>());

        assert!(store.delete(jobs[1].id).await.unwrap());
        assert!(!store.delete(jobs[1].id).await.unwrap());
        assert_eq!(
            JobStore::list(&store, Some(JobStatus::Queued))
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
