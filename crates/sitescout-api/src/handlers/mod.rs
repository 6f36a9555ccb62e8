//! Request handlers.

pub mod directory;
pub mod jobs;
pub mod searches;

use axum::response::IntoResponse;
use axum::Json;

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
