//! Search session repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sitescout_core::{
    new_v7, Error, Result, SearchHit, SearchResult, SearchSession, SearchSessionRepository,
};

const SESSION_COLUMNS: &str = "id, queries, fingerprint, industry, location, status, \
     total_results, successful_queries, elapsed_ms, created_at, completed_at";

const RESULT_COLUMNS: &str =
    "id, session_id, position, title, url, snippet, processed, created_at";

/// PostgreSQL implementation of SearchSessionRepository.
pub struct PgSearchSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSearchSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_session(row: &PgRow) -> Result<SearchSession> {
        let status: String = row.try_get("status")?;
        Ok(SearchSession {
            id: row.try_get("id")?,
            queries: row.try_get("queries")?,
            fingerprint: row.try_get("fingerprint")?,
            industry: row.try_get("industry")?,
            location: row.try_get("location")?,
            status: status.parse()?,
            total_results: row.try_get("total_results")?,
            successful_queries: row.try_get("successful_queries")?,
            elapsed_ms: row.try_get("elapsed_ms")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    pub(crate) fn parse_result(row: &PgRow) -> Result<SearchResult> {
        Ok(SearchResult {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            position: row.try_get("position")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            snippet: row.try_get("snippet")?,
            processed: row.try_get("processed")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl SearchSessionRepository for PgSearchSessionRepository {
    async fn create_or_reuse(
        &self,
        candidate: SearchSession,
        reuse_since: DateTime<Utc>,
    ) -> Result<(SearchSession, bool)> {
        let mut tx = self.pool.begin().await?;

        // Serialise creators of the same fingerprint so check-then-insert is atomic.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&candidate.fingerprint)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM search_sessions
             WHERE fingerprint = $1 AND created_at >= $2
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(&candidate.fingerprint)
        .bind(reuse_since)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let session = Self::parse_session(&row)?;
            tx.commit().await?;
            return Ok((session, true));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO search_sessions
                (id, queries, fingerprint, industry, location, status,
                 total_results, successful_queries, elapsed_ms, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, $7)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(candidate.id)
        .bind(&candidate.queries)
        .bind(&candidate.fingerprint)
        .bind(&candidate.industry)
        .bind(&candidate.location)
        .bind(candidate.status.as_str())
        .bind(candidate.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let session = Self::parse_session(&row)?;
        tx.commit().await?;
        Ok((session, false))
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM search_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn complete(
        &self,
        id: Uuid,
        total_results: i32,
        successful_queries: i32,
        elapsed_ms: i64,
    ) -> Result<SearchSession> {
        let row = sqlx::query(&format!(
            "UPDATE search_sessions
             SET status = 'completed', total_results = $2, successful_queries = $3,
                 elapsed_ms = $4, completed_at = $5
             WHERE id = $1
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(total_results)
        .bind(successful_queries)
        .bind(elapsed_ms)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("search session {}", id)))?;

        Self::parse_session(&row)
    }

    async fn insert_hits(&self, session_id: Uuid, hits: &[SearchHit]) -> Result<Vec<SearchResult>> {
        let mut tx = self.pool.begin().await?;

        // Row lock keeps concurrent appends to one session from colliding on position.
        let exists = sqlx::query("SELECT id FROM search_sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("search session {}", session_id)));
        }

        let last_position: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) FROM search_results WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(hits.len());
        for (offset, hit) in hits.iter().enumerate() {
            let row = sqlx::query(&format!(
                "INSERT INTO search_results
                    (id, session_id, position, title, url, snippet, processed, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
                 RETURNING {RESULT_COLUMNS}"
            ))
            .bind(new_v7())
            .bind(session_id)
            .bind(last_position + offset as i32 + 1)
            .bind(&hit.title)
            .bind(&hit.url)
            .bind(&hit.snippet)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(Self::parse_result(&row)?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<SearchResult>> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM search_results WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_result).transpose()
    }

    async fn list_results(
        &self,
        session_id: Uuid,
        only_unprocessed: bool,
    ) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM search_results
             WHERE session_id = $1 AND ($2 = FALSE OR processed = FALSE)
             ORDER BY position"
        ))
        .bind(session_id)
        .bind(only_unprocessed)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_result).collect()
    }
}
