//! API Error Types
//!
//! Defines error types for the API layer and implements conversion
//! to HTTP responses with appropriate status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::query::QueryError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed
    #[error("{0}")]
    Validation(String),

    /// Resource not found
    #[error("{0}")]
    NotFound(String),

    /// Query parsing or execution error
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Backend failure or missing capability
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Bare `{code, message}` body used for missing UIDs
#[derive(Serialize)]
pub struct NotFoundBody {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Query(QueryError::Backend(e)) | ApiError::Backend(e) => backend_status(e),
            ApiError::Query(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn backend_status(error: &BackendError) -> StatusCode {
    StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = uuid::Uuid::new_v4().to_string();

        // Log the error
        tracing::error!(
            request_id = %request_id,
            status = status.as_u16(),
            error_message = %self,
            "API error occurred"
        );

        match self {
            ApiError::Query(QueryError::MissingStart) => {
                (status, Json("Missing start parameter")).into_response()
            }
            ApiError::NotFound(message) => (
                status,
                Json(NotFoundBody {
                    code: status.as_u16(),
                    message,
                }),
            )
                .into_response(),
            other => {
                let body = ErrorResponse {
                    error: ErrorBody {
                        code: status.as_u16(),
                        message: other.to_string(),
                    },
                    request_id,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
