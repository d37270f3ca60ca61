//! Server Metadata Routes
//!
//! - GET/POST /api/aggregators - Supported aggregator names
//! - GET/POST /api/version - Build metadata
//! - GET /api/config - Server configuration (always empty)

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::dto::VersionResponse;
use crate::api::state::AppState;
use crate::query::Aggregator;

/// GET/POST /api/aggregators
pub async fn aggregators() -> Json<Vec<&'static str>> {
    Json(Aggregator::ALL.iter().map(|a| a.as_str()).collect())
}

/// GET/POST /api/version
pub async fn version(State(state): State<Arc<AppState>>) -> Json<VersionResponse> {
    Json(VersionResponse::new(state.config.query.version.clone()))
}

/// GET /api/config
pub async fn config() -> Json<Value> {
    Json(json!({}))
}
