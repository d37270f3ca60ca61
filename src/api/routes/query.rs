//! Query Routes
//!
//! - GET /api/query - Metric queries from `m` parameters
//! - POST /api/query - Metric queries from a JSON body
//! - GET /api/query/gexp - Series expressions from `exp` parameters

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{QueryBody, TimeValue};
use crate::api::error::{ApiError, ApiResult};
use crate::api::params::QueryParams;
use crate::api::state::AppState;
use crate::query::{CombinedSeries, QueryOptions, QueryRequest, QueryResult};

/// Response flags shared by the GET forms
fn query_options(params: &QueryParams) -> QueryOptions {
    QueryOptions {
        arrays: params.flag("arrays"),
        ms_resolution: params.present("ms"),
        show_query: params.flag("show_query"),
        show_tsuids: params.flag("show_tsuids"),
        annotations: !params.flag("no_annotations"),
        global_annotations: params.flag("global_annotations"),
    }
}

/// GET /api/query
pub async fn query_get(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
) -> ApiResult<Json<Vec<CombinedSeries>>> {
    let tokens = params.all("m");
    if tokens.is_empty() && params.get("start").is_some() {
        return Err(ApiError::Validation("Missing m parameter".to_string()));
    }

    let series = state
        .executor
        .execute_str(
            params.get("start"),
            params.get("end"),
            &tokens,
            query_options(&params),
        )
        .await?;
    Ok(Json(series))
}

/// POST /api/query
pub async fn query_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> ApiResult<Json<Vec<CombinedSeries>>> {
    let options = body.options();
    let queries = body
        .queries
        .into_iter()
        .map(|q| q.into_metric_query())
        .collect::<QueryResult<Vec<_>>>()?;

    let request = QueryRequest {
        start: body.start.map(TimeValue::into_string),
        end: body.end.map(TimeValue::into_string),
        queries,
        options,
    };
    Ok(Json(state.executor.execute(&request).await?))
}

/// GET /api/query/gexp
pub async fn gexp_get(
    State(state): State<Arc<AppState>>,
    params: QueryParams,
) -> ApiResult<Json<Vec<CombinedSeries>>> {
    let expressions = params.all("exp");
    if expressions.is_empty() && params.get("start").is_some() {
        return Err(ApiError::Validation("Missing exp parameter".to_string()));
    }

    let series = state
        .executor
        .execute_expressions(
            params.get("start"),
            params.get("end"),
            &expressions,
            query_options(&params),
        )
        .await?;
    Ok(Json(series))
}
