//! Classification lineage repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sitescout_core::{
    Error, LlmProcessingResult, LlmProcessingSession, LlmSessionStatus, ProcessingCounts, Result,
    TraceRepository,
};

const SESSION_COLUMNS: &str = "id, session_id, total_results, status, accepted_count, \
     rejected_count, error_count, extraction_quality, created_at, completed_at";

const RESULT_COLUMNS: &str = "r.id, r.search_result_id, r.llm_session_id, r.status, \
     r.is_company_website, r.confidence, r.company_name, r.website, r.extracted_from, r.city, \
     r.state_province, r.country, r.categories, r.prompt_excerpt, r.response_excerpt, \
     r.error_message, r.processing_ms, r.business_id, r.created_at";

/// PostgreSQL implementation of TraceRepository.
pub struct PgTraceRepository {
    pool: Pool<Postgres>,
}

impl PgTraceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_session(row: &PgRow) -> Result<LlmProcessingSession> {
        let status: String = row.try_get("status")?;
        let accepted: i32 = row.try_get("accepted_count")?;
        let rejected: i32 = row.try_get("rejected_count")?;
        let errored: i32 = row.try_get("error_count")?;
        Ok(LlmProcessingSession {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            total_results: row.try_get("total_results")?,
            status: status.parse()?,
            counts: ProcessingCounts {
                accepted: accepted.max(0) as u32,
                rejected: rejected.max(0) as u32,
                errored: errored.max(0) as u32,
            },
            extraction_quality: row.try_get("extraction_quality")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn parse_result(row: &PgRow) -> Result<LlmProcessingResult> {
        let status: String = row.try_get("status")?;
        Ok(LlmProcessingResult {
            id: row.try_get("id")?,
            search_result_id: row.try_get("search_result_id")?,
            llm_session_id: row.try_get("llm_session_id")?,
            status: status.parse()?,
            is_company_website: row.try_get("is_company_website")?,
            confidence: row.try_get("confidence")?,
            company_name: row.try_get("company_name")?,
            website: row.try_get("website")?,
            extracted_from: row.try_get("extracted_from")?,
            city: row.try_get("city")?,
            state_province: row.try_get("state_province")?,
            country: row.try_get("country")?,
            categories: row.try_get("categories")?,
            prompt_excerpt: row.try_get("prompt_excerpt")?,
            response_excerpt: row.try_get("response_excerpt")?,
            error_message: row.try_get("error_message")?,
            processing_ms: row.try_get("processing_ms")?,
            business_id: row.try_get("business_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn write_result<'e, E>(executor: E, result: &LlmProcessingResult) -> Result<u64>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let done = sqlx::query(
            "UPDATE llm_processing_results
             SET status = $2, is_company_website = $3, confidence = $4, company_name = $5,
                 website = $6, extracted_from = $7, city = $8, state_province = $9,
                 country = $10, categories = $11, prompt_excerpt = $12,
                 response_excerpt = $13, error_message = $14, processing_ms = $15,
                 business_id = $16
             WHERE id = $1",
        )
        .bind(result.id)
        .bind(result.status.as_str())
        .bind(result.is_company_website)
        .bind(result.confidence)
        .bind(&result.company_name)
        .bind(&result.website)
        .bind(&result.extracted_from)
        .bind(&result.city)
        .bind(&result.state_province)
        .bind(&result.country)
        .bind(&result.categories)
        .bind(&result.prompt_excerpt)
        .bind(&result.response_excerpt)
        .bind(&result.error_message)
        .bind(result.processing_ms)
        .bind(result.business_id)
        .execute(executor)
        .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl TraceRepository for PgTraceRepository {
    async fn insert_session(&self, session: &LlmProcessingSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO llm_processing_sessions
                (id, session_id, total_results, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session.id)
        .bind(session.session_id)
        .bind(session.total_results)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<LlmProcessingSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM llm_processing_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn set_session_status(&self, id: Uuid, status: LlmSessionStatus) -> Result<()> {
        let done = sqlx::query("UPDATE llm_processing_sessions SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("llm processing session {}", id)));
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        id: Uuid,
        counts: ProcessingCounts,
        extraction_quality: f64,
    ) -> Result<LlmProcessingSession> {
        let row = sqlx::query(&format!(
            "UPDATE llm_processing_sessions
             SET status = 'completed', accepted_count = $2, rejected_count = $3,
                 error_count = $4, extraction_quality = $5, completed_at = $6
             WHERE id = $1
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(counts.accepted as i32)
        .bind(counts.rejected as i32)
        .bind(counts.errored as i32)
        .bind(extraction_quality)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("llm processing session {}", id)))?;

        Self::parse_session(&row)
    }

    async fn list_sessions(&self, search_session_id: Uuid) -> Result<Vec<LlmProcessingSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM llm_processing_sessions
             WHERE session_id = $1
             ORDER BY created_at"
        ))
        .bind(search_session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_session).collect()
    }

    async fn insert_result(&self, result: &LlmProcessingResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO llm_processing_results
                (id, search_result_id, llm_session_id, status, is_company_website, confidence,
                 company_name, website, extracted_from, city, state_province, country,
                 categories, prompt_excerpt, response_excerpt, error_message, processing_ms,
                 business_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19)",
        )
        .bind(result.id)
        .bind(result.search_result_id)
        .bind(result.llm_session_id)
        .bind(result.status.as_str())
        .bind(result.is_company_website)
        .bind(result.confidence)
        .bind(&result.company_name)
        .bind(&result.website)
        .bind(&result.extracted_from)
        .bind(&result.city)
        .bind(&result.state_province)
        .bind(&result.country)
        .bind(&result.categories)
        .bind(&result.prompt_excerpt)
        .bind(&result.response_excerpt)
        .bind(&result.error_message)
        .bind(result.processing_ms)
        .bind(result.business_id)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_result(&self, result: &LlmProcessingResult) -> Result<()> {
        if Self::write_result(&self.pool, result).await? == 0 {
            return Err(Error::NotFound(format!("llm processing result {}", result.id)));
        }
        Ok(())
    }

    async fn finalize_result(&self, result: &LlmProcessingResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if Self::write_result(&mut *tx, result).await? == 0 {
            return Err(Error::NotFound(format!("llm processing result {}", result.id)));
        }

        let marked = sqlx::query("UPDATE search_results SET processed = TRUE WHERE id = $1")
            .bind(result.search_result_id)
            .execute(&mut *tx)
            .await?;
        if marked.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "search result {}",
                result.search_result_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LlmProcessingResult>> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM llm_processing_results r WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_result).transpose()
    }

    async fn link_business(&self, result_id: Uuid, business_id: Uuid) -> Result<()> {
        let done = sqlx::query("UPDATE llm_processing_results SET business_id = $2 WHERE id = $1")
            .bind(result_id)
            .bind(business_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("llm processing result {}", result_id)));
        }
        Ok(())
    }

    async fn list_results_for_search_session(
        &self,
        search_session_id: Uuid,
    ) -> Result<Vec<LlmProcessingResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS}
             FROM llm_processing_results r
             JOIN search_results s ON s.id = r.search_result_id
             WHERE s.session_id = $1
             ORDER BY s.position, r.created_at"
        ))
        .bind(search_session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_result).collect()
    }
}
