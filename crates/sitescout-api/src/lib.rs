//! # sitescout-api
//!
//! HTTP surface for sitescout: record searches and queue their extraction,
//! inspect background jobs and lineage, preview directory writes.
//!
//! The router is built here so tests can serve it on an ephemeral port;
//! `main.rs` wires configuration, storage and the background workers.

pub mod error;
pub mod handlers;

use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sitescout_db::{RecorderConfig, Repositories};
use sitescout_jobs::JobManager;

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub jobs: JobManager,
    pub recorder: RecorderConfig,
}

impl AppState {
    pub fn new(repos: Repositories, jobs: JobManager, recorder: RecorderConfig) -> Self {
        Self {
            repos,
            jobs,
            recorder,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/searches", post(handlers::searches::submit_search))
        .route("/api/v1/jobs", get(handlers::jobs::list_jobs))
        .route("/api/v1/jobs/stats", get(handlers::jobs::queue_stats))
        .route(
            "/api/v1/jobs/:id",
            get(handlers::jobs::get_job).delete(handlers::jobs::cancel_job),
        )
        .route(
            "/api/v1/sessions/:id/trace",
            get(handlers::searches::session_trace),
        )
        .route(
            "/api/v1/directory/preview",
            post(handlers::directory::preview_write),
        )
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                    .max_age(Duration::from_secs(3600)),
            ),
        )
        .with_state(state)
}
