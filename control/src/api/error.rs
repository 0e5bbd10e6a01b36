use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hwalloc_engine::EngineError;
use thiserror::Error;
use tracing::error;

use crate::types::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("allocation for cloud {0} did not finish in time, retry later")]
    Timeout(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::InsufficientCapacity { .. } => {
                    (StatusCode::CONFLICT, "insufficient_capacity")
                }
                EngineError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
                EngineError::ConcurrentModification { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "concurrent_modification")
                }
                EngineError::NotAssigned { .. } => (StatusCode::NOT_FOUND, "not_assigned"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Timeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "timeout"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
            error_code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
