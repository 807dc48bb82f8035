//! JSON endpoints and their shared error shape.

pub mod health;
pub mod import;
pub mod jobs;
pub mod repos;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub(crate) fn unavailable(e: impl std::fmt::Display) -> ApiError {
    error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

pub(crate) fn not_found(resource: &str, id: impl std::fmt::Display) -> ApiError {
    error(StatusCode::NOT_FOUND, format!("{resource} not found: {id}"))
}

pub(crate) fn bad_request(msg: impl Into<String>) -> ApiError {
    error(StatusCode::BAD_REQUEST, msg)
}

/// Map a store failure: outages are 503, everything else 500.
pub(crate) fn store_error(e: intake_storage::StoreError) -> ApiError {
    if e.is_unavailable() {
        unavailable(e)
    } else {
        internal_error(e)
    }
}
