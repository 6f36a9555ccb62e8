//! Search submission and session lineage.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use sitescout_core::{JobType, SearchHit, SessionStatus};
use sitescout_jobs::ExtractionPayload;

use crate::{ApiError, AppState};

/// Body of `POST /api/v1/searches`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSearchRequest {
    pub queries: Vec<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    /// Defaults to the number of queries.
    #[serde(default)]
    pub successful_queries: Option<i32>,
    #[serde(default)]
    pub elapsed_ms: i64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSearchResponse {
    pub session_id: Uuid,
    pub job_id: Uuid,
    pub results_recorded: usize,
}

/// Record a search and queue its extraction.
///
/// A session reused within the reuse window that is already complete keeps
/// its recorded hits; only its unprocessed hits are classified again.
pub async fn submit_search(
    State(state): State<AppState>,
    Json(body): Json<SubmitSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(t) = body.threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(ApiError::BadRequest(format!(
                "threshold {} outside [0, 1]",
                t
            )));
        }
    }
    if body.hits.is_empty() {
        return Err(ApiError::BadRequest("search has no hits".to_string()));
    }
    if let Some(idx) = body.hits.iter().position(|h| h.url.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!("hit {} has no url", idx)));
    }

    let recorder = state.repos.recorder(state.recorder.clone());
    let session = recorder
        .create_session(
            &body.queries,
            body.industry.as_deref(),
            body.location.as_deref(),
        )
        .await?;

    let mut recorded = 0;
    if session.status == SessionStatus::Pending {
        recorded = recorder.add_results(session.id, &body.hits).await?;
        let successful = body
            .successful_queries
            .unwrap_or(session.queries.len() as i32);
        recorder
            .complete_session(session.id, recorded as i32, successful, body.elapsed_ms)
            .await?;
    }

    let payload = ExtractionPayload {
        session_id: session.id,
        industry: body.industry,
        location: body.location,
        dry_run: body.dry_run,
        threshold: body.threshold,
    };
    let payload = serde_json::to_value(&payload).map_err(sitescout_core::Error::from)?;
    let job = state
        .jobs
        .create_job(JobType::SearchExtraction, payload)
        .await?;

    info!(
        subsystem = "api",
        op = "submit_search",
        session_id = %session.id,
        job_id = %job.id,
        results_recorded = recorded,
        "Search accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitSearchResponse {
            session_id: session.id,
            job_id: job.id,
            results_recorded: recorded,
        }),
    ))
}

/// Full lineage of a session.
pub async fn session_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let trace = state.repos.traceability().get_full_trace(id).await?;
    Ok(Json(trace))
}
