//! Façade-wide error type: every library crate's error gets one HTTP
//! status and one JSON body shape, instead of each handler inventing its own.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Ces(#[from] neuro_ces::CesError),
    #[error(transparent)]
    Cache(#[from] neuro_cache::CacheError),
    #[error(transparent)]
    Placement(#[from] neuro_placement::PlacementError),
    #[error(transparent)]
    Scheduler(#[from] neuro_scheduler::SchedulerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Ces(neuro_ces::CesError::InsufficientShards { .. }) => StatusCode::CONFLICT,
            ApiError::Ces(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Cache(neuro_cache::CacheError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Cache(neuro_cache::CacheError::CacheFull) => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Placement(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Scheduler(neuro_scheduler::SchedulerError::JobNotFound) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
