//! Job store implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sitescout_core::{ExternalJobRef, Job, JobProgress, JobStatus, JobStore, Result};

const JOB_COLUMNS: &str = "id, job_type, payload, status, progress, result, error, external, \
     created_at, started_at, finished_at";

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let job_type: String = row.try_get("job_type")?;
        let status: String = row.try_get("status")?;
        let progress: Json<JobProgress> = row.try_get("progress")?;
        let external: Option<Json<ExternalJobRef>> = row.try_get("external")?;
        Ok(Job {
            id: row.try_get("id")?,
            job_type: job_type.parse()?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            progress: progress.0,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            external: external.map(|e| e.0),
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn put(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs
                (id, job_type, payload, status, progress, result, error, external,
                 created_at, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                payload     = EXCLUDED.payload,
                status      = EXCLUDED.status,
                progress    = EXCLUDED.progress,
                result      = EXCLUDED.result,
                error       = EXCLUDED.error,
                external    = EXCLUDED.external,
                started_at  = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at",
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(Json(&job.progress))
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.external.as_ref().map(Json))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at, id"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_job_row).collect()
    }
}
