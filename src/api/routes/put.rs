//! Write Routes
//!
//! - POST /api/put - Store one point or an array of points

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{PutBody, PutFailure, PutSummary};
use crate::api::error::{ApiError, ApiResult};
use crate::api::params::QueryParams;
use crate::api::state::AppState;

/// POST /api/put
///
/// 204 when every point was stored and no report was asked for. With
/// `summary` or `details` the per-point outcome is returned as 200.
pub async fn put(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
    Json(body): Json<PutBody>,
) -> ApiResult<Response> {
    let summary = params.present("summary");
    let details = params.present("details") || params.present("detailed");

    let points = body.into_vec();
    let total = points.len();
    let results = state.backend.store_points(points.clone()).await?;

    let failures: Vec<PutFailure> = points
        .into_iter()
        .zip(results)
        .filter_map(|(datapoint, result)| result.err().map(|error| PutFailure { datapoint, error }))
        .collect();
    let failed = failures.len();

    for failure in &failures {
        tracing::warn!(metric = %failure.datapoint.metric, "Rejected point: {}", failure.error);
    }

    if !summary && !details {
        if failed == 0 {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        return Err(ApiError::Validation(format!(
            "One or more data points had errors: {} failed",
            failed
        )));
    }

    Ok(Json(PutSummary {
        failed,
        success: total - failed,
        errors: details.then_some(failures),
    })
    .into_response())
}
