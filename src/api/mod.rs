//! OpenTSDB-compatible REST API
//!
//! HTTP API layer built with Axum. Response shapes follow OpenTSDB 2.x.
//!
//! # Endpoints
//!
//! ## Query
//! - `GET /api/query` - Metric queries (`m=...`, repeatable)
//! - `POST /api/query` - Metric queries from a JSON body
//! - `GET /api/query/gexp` - Series expressions (`exp=...`, repeatable)
//!
//! ## Metadata
//! - `GET/POST /api/search/lookup` - Series lookup
//! - `GET /api/suggest` - Metric, tag key and tag value completion
//! - `GET /api/uid/uidmeta` - UID metadata
//!
//! ## Writes
//! - `POST /api/put` - Store points
//! - `POST /api/annotation` - Store an annotation
//! - `DELETE /api/annotation` - Delete an annotation
//! - `POST /api/annotation/bulk` - Store several annotations
//!
//! ## Server
//! - `GET/POST /api/aggregators` - Aggregator names
//! - `GET/POST /api/version` - Build metadata
//! - `GET /api/config` - Configuration (empty)
//!
//! # Example
//!
//! ```rust,ignore
//! use tsdb_shim::api::{serve, AppState};
//! use tsdb_shim::backend::MemoryBackend;
//! use tsdb_shim::config::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let api = config.api.clone();
//!     let state = AppState::new(Arc::new(MemoryBackend::new()), config);
//!     serve(state, &api).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod params;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ApiConfig;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let log_requests = state.config.api.log_requests;
    let cors_permissive = state.config.api.cors_permissive;

    let api_routes = Router::new()
        // Query routes
        .route(
            "/query",
            get(routes::query::query_get).post(routes::query::query_post),
        )
        .route("/query/gexp", get(routes::query::gexp_get))
        // Metadata routes
        .route(
            "/search/lookup",
            get(routes::search::lookup_get).post(routes::search::lookup_post),
        )
        .route("/suggest", get(routes::search::suggest))
        .route("/uid/uidmeta", get(routes::search::uid_meta))
        // Write routes
        .route("/put", post(routes::put::put))
        .route(
            "/annotation",
            post(routes::annotation::create).delete(routes::annotation::delete),
        )
        .route("/annotation/bulk", post(routes::annotation::bulk))
        // Server routes
        .route(
            "/aggregators",
            get(routes::meta::aggregators).post(routes::meta::aggregators),
        )
        .route(
            "/version",
            get(routes::meta::version).post(routes::meta::version),
        )
        .route("/config", get(routes::meta::config));

    // Create shared state
    let shared_state = Arc::new(state);

    let mut router = Router::new()
        .nest("/api", api_routes)
        .with_state(shared_state);

    if log_requests {
        router = router.layer(TraceLayer::new_for_http());
    }
    if cors_permissive {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("tsdb-shim API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("tsdb-shim API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendResult, IncomingPoint, MemoryBackend, RawSeries, SeriesQuery};
    use crate::config::Config;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    /// Backend that only serves series
    struct ReadOnly;

    #[async_trait]
    impl Backend for ReadOnly {
        async fn query_series(&self, _query: &SeriesQuery) -> BackendResult<Vec<RawSeries>> {
            Ok(Vec::new())
        }
    }

    async fn create_test_app() -> (Router, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let now = chrono::Utc::now().timestamp_millis();

        let points = (1..=4)
            .map(|i| IncomingPoint {
                metric: "some.metric".to_string(),
                timestamp: now - 50_000 + i * 10_000,
                value: i as f64,
                tags: [("host".to_string(), "host1".to_string())].into(),
            })
            .collect();
        let results = backend.store_points(points).await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));

        let mut config = Config::default();
        config.query.version = "2.2.0-test".to_string();
        let state = AppState::new(backend.clone(), config);
        (build_router(state), backend)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_query_end_to_end() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(
            app,
            "GET",
            "/api/query?start=1m-ago&m=sum:10s-avg:some.metric%7Bhost%3Dhost1%7D&arrays=true",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let series = body.as_array().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0]["metric"], "some.metric");
        assert_eq!(series[0]["tags"], json!({"host": "host1"}));
        assert_eq!(series[0]["aggregatedTags"], json!([]));
        assert_eq!(series[0]["dps"].as_array().unwrap().len(), 4);
        assert_eq!(series[0]["dps"][0][1], 1.0);
    }

    #[tokio::test]
    async fn test_query_flags() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(
            app,
            "GET",
            "/api/query?start=1m-ago&m=sum:some.metric&show_query=true&show_tsuids=true&no_annotations=true",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let series = &body[0];
        assert_eq!(series["aggregatedTags"], json!(["host"]));
        assert_eq!(series["tsuids"], json!(["000001000001000001"]));
        assert_eq!(series["query"]["aggregator"], "sum");
        assert!(series["query"]["tsuids"].is_null());
        assert!(series.get("annotations").is_none());
        assert!(series["dps"].is_object());
    }

    #[tokio::test]
    async fn test_query_errors() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(app.clone(), "GET", "/api/query?m=sum:some.metric", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!("Missing start parameter"));

        let (status, body) = send(app.clone(), "GET", "/api/query?start=1m-ago&m=sum", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 400);
        assert!(body["request_id"].is_string());

        let (status, _) = send(app.clone(), "GET", "/api/query?start=1m-ago&m=p99:some.metric", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = send(app.clone(), "DELETE", "/api/query", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(app, "GET", "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_post() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(
            app,
            "POST",
            "/api/query",
            Some(json!({
                "start": "1m-ago",
                "msResolution": true,
                "queries": [{"aggregator": "max", "metric": "some.metric", "tags": {"host": "*"}}]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["tags"], json!({"host": "host1"}));
        assert_eq!(body[0]["dps"].as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_gexp() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(
            app,
            "GET",
            "/api/query/gexp?start=1m-ago&exp=scale(sum:some.metric,2)",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["metric"], "scale(sum:some.metric,2)");
        let values: Vec<f64> = body[0]["dps"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_f64().unwrap())
            .collect();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[tokio::test]
    async fn test_server_metadata() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(app.clone(), "POST", "/api/aggregators", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["avg", "sum", "min", "max", "count"]));

        let (_, body) = send(app.clone(), "GET", "/api/version", None).await;
        assert_eq!(body["version"], "2.2.0-test");
        assert_eq!(body["short_revision"], "11c5eef");

        let (_, body) = send(app, "GET", "/api/config", None).await;
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_search_and_suggest() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(
            app.clone(),
            "GET",
            "/api/search/lookup?m=some.metric%7Bhost%3D*%7D",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "LOOKUP");
        assert_eq!(body["totalResults"], 1);
        assert_eq!(body["results"][0]["tags"]["host"], "host1");

        let (status, body) = send(app.clone(), "GET", "/api/search/lookup", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "You must specify a query");

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/search/lookup",
            Some(json!({"metric": "some.metric", "limit": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalResults"], 1);
        assert_eq!(body["limit"], 5);

        let (_, body) = send(app.clone(), "GET", "/api/suggest?type=metrics&q=some", None).await;
        assert_eq!(body, json!(["some.metric"]));

        let (_, body) = send(app.clone(), "GET", "/api/suggest?type=tagv&q=", None).await;
        assert_eq!(body, json!(["host1"]));

        let (status, _) = send(app, "GET", "/api/suggest?type=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_uid_meta() {
        let (app, _backend) = create_test_app().await;

        let (status, body) = send(app.clone(), "GET", "/api/uid/uidmeta?uid=000001&type=metric", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "some.metric");
        assert_eq!(body["type"], "METRIC");

        let (status, body) = send(app, "GET", "/api/uid/uidmeta?uid=00FFFF&type=tagk", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"code": 404, "message": "tagk with uid 00FFFF not found"})
        );
    }

    #[tokio::test]
    async fn test_put() {
        let (app, backend) = create_test_app().await;

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/put",
            Some(json!({"metric": "new.metric", "timestamp": 1500000000, "value": 3, "tags": {"host": "a"}})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());
        assert_eq!(backend.series_count().await, 2);

        let batch = json!([
            {"metric": "new.metric", "timestamp": 1500000010, "value": 4, "tags": {"host": "a"}},
            {"metric": "new.metric", "timestamp": 1500000020, "value": 5, "tags": {}}
        ]);

        let (status, body) = send(app.clone(), "POST", "/api/put", Some(batch.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 400);

        let (status, body) = send(app.clone(), "POST", "/api/put?details", Some(batch.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["errors"][0]["error"], "Missing tags");

        let (status, body) = send(app.clone(), "POST", "/api/put?summary", Some(batch.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["failed"], 1);
        assert!(body.get("errors").is_none());

        let (status, _) = send(app, "POST", "/api/put?summary=false", Some(batch)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_annotations() {
        let (app, _backend) = create_test_app().await;
        let now = chrono::Utc::now().timestamp();
        let annotation = json!({"description": "deploy", "notes": "", "startTime": now - 30});

        let (status, body) = send(app.clone(), "POST", "/api/annotation", Some(annotation.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, annotation);

        let (_, body) = send(
            app.clone(),
            "GET",
            "/api/query?start=1m-ago&m=sum:some.metric&global_annotations=true",
            None,
        )
        .await;
        assert_eq!(body[0]["globalAnnotations"][0]["description"], "deploy");
        assert_eq!(body[0]["annotations"], json!([]));

        let (status, _) = send(app.clone(), "DELETE", "/api/annotation", Some(annotation.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(app.clone(), "DELETE", "/api/annotation", Some(annotation)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            app,
            "POST",
            "/api/annotation/bulk",
            Some(json!([
                {"description": "a", "startTime": now},
                {"description": "b", "startTime": now + 1}
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_capability() {
        let state = AppState::new(Arc::new(ReadOnly), Config::default());
        let app = build_router(state);

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/put",
            Some(json!({"metric": "m", "timestamp": 1, "value": 1, "tags": {"host": "a"}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"]["message"], "Backend does not implement storePoints");

        let (status, body) = send(app, "GET", "/api/query?start=1h-ago&m=sum:anything", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
