//! Search session recording.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use sitescout_core::{
    defaults, new_v7, normalize_queries, session_fingerprint, Error, Result, SearchHit,
    SearchResult, SearchSession, SearchSessionRepository, SessionStatus,
};

/// Configuration for the session recorder.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Window within which an identical create returns the existing session.
    pub reuse_window: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            reuse_window: Duration::from_secs(defaults::SESSION_REUSE_WINDOW_SECS),
        }
    }
}

impl RecorderConfig {
    /// Environment variables:
    /// - `SESSION_REUSE_WINDOW_SECS`: reuse window (default: 60)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var("SESSION_REUSE_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.reuse_window = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_reuse_window(mut self, window: Duration) -> Self {
        self.reuse_window = window;
        self
    }
}

/// Records search sessions and their ranked hits.
#[derive(Clone)]
pub struct SessionRecorder {
    sessions: Arc<dyn SearchSessionRepository>,
    config: RecorderConfig,
}

fn clean_context(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SessionRecorder {
    pub fn new(sessions: Arc<dyn SearchSessionRepository>, config: RecorderConfig) -> Self {
        Self { sessions, config }
    }

    /// Create a session, or return the one created for the same normalised
    /// queries and context within the reuse window.
    pub async fn create_session<S: AsRef<str>>(
        &self,
        queries: &[S],
        industry: Option<&str>,
        location: Option<&str>,
    ) -> Result<SearchSession> {
        let normalized = normalize_queries(queries);
        if normalized.is_empty() {
            return Err(Error::Validation(
                "at least one non-blank query is required".to_string(),
            ));
        }

        let now = Utc::now();
        let fingerprint = session_fingerprint(&normalized, industry, location);
        let window = chrono::Duration::from_std(self.config.reuse_window)
            .map_err(|e| Error::Config(format!("invalid session reuse window: {}", e)))?;

        let candidate = SearchSession {
            id: new_v7(),
            queries: normalized,
            fingerprint,
            industry: clean_context(industry),
            location: clean_context(location),
            status: SessionStatus::Pending,
            total_results: 0,
            successful_queries: 0,
            elapsed_ms: 0,
            created_at: now,
            completed_at: None,
        };

        let (session, reused) = self
            .sessions
            .create_or_reuse(candidate, now - window)
            .await?;

        if reused {
            debug!(
                subsystem = "db",
                component = "recorder",
                op = "create_session",
                session_id = %session.id,
                "Reusing recent session with identical queries"
            );
        } else {
            info!(
                subsystem = "db",
                component = "recorder",
                op = "create_session",
                session_id = %session.id,
                query_count = session.queries.len(),
                "Search session created"
            );
        }
        Ok(session)
    }

    /// Append ranked hits to a session. Returns the number recorded.
    pub async fn add_results(&self, session_id: Uuid, hits: &[SearchHit]) -> Result<usize> {
        if let Some(idx) = hits.iter().position(|h| h.url.trim().is_empty()) {
            return Err(Error::Validation(format!("hit {} has no url", idx)));
        }
        if hits.is_empty() {
            self.get_session(session_id).await?;
            return Ok(0);
        }

        let inserted = self.sessions.insert_hits(session_id, hits).await?;
        debug!(
            subsystem = "db",
            component = "recorder",
            op = "add_results",
            session_id = %session_id,
            hit_count = inserted.len(),
            "Search results recorded"
        );
        Ok(inserted.len())
    }

    /// Mark a session completed with its final totals.
    pub async fn complete_session(
        &self,
        session_id: Uuid,
        total_results: i32,
        successful_queries: i32,
        elapsed_ms: i64,
    ) -> Result<SearchSession> {
        let session = self
            .sessions
            .complete(session_id, total_results, successful_queries, elapsed_ms)
            .await?;
        info!(
            subsystem = "db",
            component = "recorder",
            op = "complete_session",
            session_id = %session_id,
            total_results,
            successful_queries,
            duration_ms = elapsed_ms,
            "Search session completed"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SearchSession> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search session {}", session_id)))
    }

    /// A session's results in rank order.
    pub async fn list_results(
        &self,
        session_id: Uuid,
        only_unprocessed: bool,
    ) -> Result<Vec<SearchResult>> {
        self.sessions.list_results(session_id, only_unprocessed).await
    }
}
