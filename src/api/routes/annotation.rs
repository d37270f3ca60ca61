//! Annotation Routes
//!
//! - POST /api/annotation - Store one annotation
//! - DELETE /api/annotation - Delete one annotation
//! - POST /api/annotation/bulk - Store a list of annotations

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::backend::Annotation;

/// POST /api/annotation
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(annotation): Json<Annotation>,
) -> ApiResult<Json<Annotation>> {
    let stored = state
        .backend
        .store_annotations(vec![annotation])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal("Backend returned no annotation".to_string()))?;
    Ok(Json(stored))
}

/// DELETE /api/annotation
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(annotation): Json<Annotation>,
) -> ApiResult<StatusCode> {
    state.backend.delete_annotation(&annotation).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/annotation/bulk
pub async fn bulk(
    State(state): State<Arc<AppState>>,
    Json(annotations): Json<Vec<Annotation>>,
) -> ApiResult<Json<Vec<Annotation>>> {
    Ok(Json(state.backend.store_annotations(annotations).await?))
}
