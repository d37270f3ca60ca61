//! Metadata Routes
//!
//! - GET/POST /api/search/lookup - Series matching a metric and tag pattern
//! - GET /api/suggest - Name completion for metrics, tag keys and tag values
//! - GET /api/uid/uidmeta - Metadata for a UID

use axum::{extract::State, Json};
use std::sync::Arc;
use std::time::Instant;

use crate::api::dto::{LookupBody, LookupResponse, UidMetaResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::params::QueryParams;
use crate::api::state::AppState;
use crate::backend::UidKind;
use crate::query::parse_lookup_query;

async fn lookup(
    state: &AppState,
    metric: Option<String>,
    limit: Option<usize>,
    use_meta: bool,
) -> ApiResult<LookupResponse> {
    let query = parse_lookup_query(metric.as_deref())?;

    let started = Instant::now();
    let results = state.backend.search_lookup(&query, limit, use_meta).await?;
    let elapsed = started.elapsed().as_millis() as u64;

    tracing::debug!(results = results.len(), "search lookup");
    Ok(LookupResponse::new(metric, limit, elapsed, results))
}

/// GET /api/search/lookup
pub async fn lookup_get(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
) -> ApiResult<Json<LookupResponse>> {
    let limit = params.parse_value("limit")?;
    let response = lookup(
        &state,
        params.get("m").map(str::to_string),
        limit,
        params.flag("use_meta"),
    )
    .await?;
    Ok(Json(response))
}

/// POST /api/search/lookup
pub async fn lookup_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LookupBody>,
) -> ApiResult<Json<LookupResponse>> {
    let response = lookup(&state, body.metric, body.limit, body.use_meta).await?;
    Ok(Json(response))
}

/// GET /api/suggest
pub async fn suggest(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
) -> ApiResult<Json<Vec<String>>> {
    let prefix = params.get("q").unwrap_or("");
    let max = params
        .parse_value("max")?
        .unwrap_or(state.config.query.suggest_max);

    let names = match params.get("type") {
        Some("metrics") => state.backend.suggest_metrics(prefix, max).await?,
        Some("tagk") => state.backend.suggest_tag_keys(prefix, max).await?,
        Some("tagv") => state.backend.suggest_tag_values(prefix, max).await?,
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "Invalid 'type' parameter: {}",
                other
            )))
        }
        None => return Err(ApiError::Validation("Missing 'type' parameter".to_string())),
    };
    Ok(Json(names))
}

/// GET /api/uid/uidmeta
pub async fn uid_meta(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
) -> ApiResult<Json<UidMetaResponse>> {
    let type_name = params
        .get("type")
        .ok_or_else(|| ApiError::Validation("Missing 'type' parameter".to_string()))?;
    let uid = params
        .get("uid")
        .ok_or_else(|| ApiError::Validation("Missing 'uid' parameter".to_string()))?;
    let kind = UidKind::from_name(type_name)
        .ok_or_else(|| ApiError::Validation(format!("Invalid 'type' parameter: {}", type_name)))?;

    match state.backend.uid_meta(kind, uid).await? {
        Some(meta) => Ok(Json(UidMetaResponse::new(meta, kind.as_upper()))),
        None => Err(ApiError::NotFound(format!(
            "{} with uid {} not found",
            type_name, uid
        ))),
    }
}
