//! Directory write preview.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use sitescout_core::{defaults, ClassifiedBusiness};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub businesses: Vec<ClassifiedBusiness>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// What a directory write would do with the given entries. Writes nothing.
pub async fn preview_write(
    State(state): State<AppState>,
    Json(body): Json<PreviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let threshold = body.threshold.unwrap_or(defaults::CONFIDENCE_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::BadRequest(format!(
            "threshold {} outside [0, 1]",
            threshold
        )));
    }
    let result = state
        .repos
        .directory_writer()
        .dry_run(&body.businesses, threshold)
        .await;
    Ok(Json(result))
}
