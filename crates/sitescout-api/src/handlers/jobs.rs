//! Job inspection and cancellation.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use sitescout_core::{defaults, JobStatus};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Newest first, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(defaults::PAGE_LIMIT);

    let mut jobs = state.jobs.list_jobs(status).await?;
    jobs.reverse();
    jobs.truncate(limit);
    Ok(Json(jobs))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.jobs.queue_stats().await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.jobs.get_job(id).await?))
}

/// Cancel a job that has not started yet; 409 otherwise.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.jobs.cancel_job(id).await?))
}
