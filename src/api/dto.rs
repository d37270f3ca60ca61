//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backend::{IncomingPoint, LookupResult, UidMeta};
use crate::query::{
    parse_downsample, Filter, MetricQuery, QueryOptions, QueryResult, RateOptions,
};

// ============================================
// QUERY DTOs
// ============================================

/// `start` / `end` as either an epoch number or a time expression
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Number(i64),
    Text(String),
}

impl TimeValue {
    pub fn into_string(self) -> String {
        match self {
            TimeValue::Number(n) => n.to_string(),
            TimeValue::Text(s) => s,
        }
    }
}

/// `POST /api/query` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    pub start: Option<TimeValue>,
    pub end: Option<TimeValue>,
    #[serde(default)]
    pub queries: Vec<SubQuery>,
    #[serde(default)]
    pub ms_resolution: bool,
    #[serde(default)]
    pub show_query: bool,
    #[serde(default, rename = "showTSUIDs")]
    pub show_tsuids: bool,
    #[serde(default)]
    pub no_annotations: bool,
    #[serde(default)]
    pub global_annotations: bool,
    #[serde(default)]
    pub arrays: bool,
}

impl QueryBody {
    /// Response shaping flags carried by the body
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            arrays: self.arrays,
            ms_resolution: self.ms_resolution,
            show_query: self.show_query,
            show_tsuids: self.show_tsuids,
            annotations: !self.no_annotations,
            global_annotations: self.global_annotations,
        }
    }
}

/// One entry of `queries[]`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub aggregator: String,
    pub metric: String,
    #[serde(default)]
    pub rate: bool,
    pub rate_options: Option<RateOptions>,
    pub downsample: Option<String>,
    /// Legacy tag map, converted into grouping filters
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl SubQuery {
    /// Convert into the query model used by the executor
    pub fn into_metric_query(self) -> QueryResult<MetricQuery> {
        let mut query = MetricQuery::new(self.aggregator, self.metric);
        if self.rate {
            query = query.with_rate(self.rate_options);
        }
        if let Some(spec) = self.downsample.as_deref() {
            query = query.with_downsample(parse_downsample(spec)?);
        }
        for (key, value) in &self.tags {
            query = query.with_filter(Filter::from_tag(key.as_str(), value));
        }
        query.filters.extend(self.filters);
        Ok(query)
    }
}

// ============================================
// SEARCH DTOs
// ============================================

/// `POST /api/search/lookup` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupBody {
    pub metric: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub use_meta: bool,
}

/// Search lookup response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metric: Option<String>,
    pub limit: Option<usize>,
    /// Milliseconds spent in the backend
    pub time: u64,
    pub results: Vec<LookupResult>,
    pub start_index: usize,
    pub total_results: usize,
}

impl LookupResponse {
    pub fn new(metric: Option<String>, limit: Option<usize>, time: u64, results: Vec<LookupResult>) -> Self {
        Self {
            kind: "LOOKUP",
            metric,
            limit,
            time,
            total_results: results.len(),
            results,
            start_index: 0,
        }
    }
}

/// UID metadata response
#[derive(Debug, Serialize)]
pub struct UidMetaResponse {
    pub uid: String,
    pub name: String,
    pub created: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl UidMetaResponse {
    pub fn new(meta: UidMeta, kind: &str) -> Self {
        Self {
            uid: meta.uid,
            name: meta.name,
            created: meta.created,
            kind: kind.to_string(),
        }
    }
}

// ============================================
// PUT DTOs
// ============================================

/// `POST /api/put` body: one point or an array of points
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PutBody {
    Many(Vec<IncomingPoint>),
    One(IncomingPoint),
}

impl PutBody {
    pub fn into_vec(self) -> Vec<IncomingPoint> {
        match self {
            PutBody::Many(points) => points,
            PutBody::One(point) => vec![point],
        }
    }
}

/// Summary returned when `summary` or `details` is set
#[derive(Debug, Serialize)]
pub struct PutSummary {
    pub failed: usize,
    pub success: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<PutFailure>>,
}

/// One rejected point
#[derive(Debug, Serialize)]
pub struct PutFailure {
    pub datapoint: IncomingPoint,
    pub error: String,
}

// ============================================
// VERSION DTOs
// ============================================

/// Build metadata reported by `/api/version`
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub timestamp: &'static str,
    pub host: &'static str,
    pub repo: &'static str,
    pub full_revision: &'static str,
    pub short_revision: &'static str,
    pub user: &'static str,
    pub repo_status: &'static str,
    pub version: String,
}

impl VersionResponse {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            timestamp: "1362712695",
            host: "localhost",
            repo: "/opt/opentsdb/build",
            full_revision: "11c5eefd79f0c800b703ebd29c10e7f924c01572",
            short_revision: "11c5eef",
            user: "localuser",
            repo_status: "MODIFIED",
            version: version.into(),
        }
    }
}
