//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by every handler; renders as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(sitescout_core::Error),
}

impl From<sitescout_core::Error> for ApiError {
    fn from(err: sitescout_core::Error) -> Self {
        use sitescout_core::Error;
        match err {
            Error::Validation(msg) => ApiError::BadRequest(msg),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            e @ Error::ExternalSystem { .. } => ApiError::BadGateway(e.to_string()),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
