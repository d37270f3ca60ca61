//! Backend collaborator
//!
//! The query engine owns no storage. Everything it reads or writes goes
//! through the [`Backend`] trait:
//!
//! - **series**: raw series for a metric, filters and time range
//! - **annotations**: per-series and global annotations
//! - **suggest / uid / lookup**: metadata queries
//! - **store**: point and annotation writes
//!
//! Only [`Backend::query_series`] is mandatory. Every other capability has a
//! default that reports [`BackendError::Unsupported`], which the HTTP layer
//! turns into a 501.
//!
//! [`memory::MemoryBackend`] implements the full capability set in memory.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::query::{Filter, TimeRange};

pub use memory::MemoryBackend;

/// Errors raised by a backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend does not implement this capability
    #[error("Backend does not implement {0}")]
    Unsupported(&'static str),

    /// The backend call itself failed
    #[error("{message}")]
    Operation { status: u16, message: String },
}

impl BackendError {
    /// Operation failure reported as a 500
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            status: 500,
            message: message.into(),
        }
    }

    /// HTTP status the failure should surface as
    pub fn status(&self) -> u16 {
        match self {
            Self::Unsupported(_) => 501,
            Self::Operation { status, .. } => *status,
        }
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A single stored measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl RawPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// One physical series as returned by the backend
///
/// `dps` is sorted ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub tsuid: String,
    #[serde(default)]
    pub dps: Vec<RawPoint>,
}

impl RawSeries {
    /// Create an empty series
    pub fn new(metric: impl Into<String>, tsuid: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            tags: BTreeMap::new(),
            tsuid: tsuid.into(),
            dps: Vec::new(),
        }
    }

    /// Builder method: add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder method: append a point
    pub fn point(mut self, timestamp: i64, value: f64) -> Self {
        self.dps.push(RawPoint::new(timestamp, value));
        self
    }
}

/// Parameters for a series fetch
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub range: TimeRange,
    /// Downsample specification as written in the query, for backends that
    /// can push it down
    pub downsample: Option<String>,
    pub metric: String,
    pub filters: Vec<Filter>,
}

/// An annotation, either attached to one series (`tsuid`) or global
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsuid: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<BTreeMap<String, String>>,
    /// Unix timestamp in seconds
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl Annotation {
    /// True when the annotation overlaps `[start, end]` (seconds)
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        let finish = self.end_time.unwrap_or(self.start_time);
        self.start_time <= end && finish >= start
    }
}

/// The three UID namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UidKind {
    Metric,
    Tagk,
    Tagv,
}

impl UidKind {
    /// Resolve a namespace name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "metric" | "metrics" => Some(Self::Metric),
            "tagk" => Some(Self::Tagk),
            "tagv" => Some(Self::Tagv),
            _ => None,
        }
    }

    /// Upper-case name as echoed by `/api/uid/uidmeta`
    pub fn as_upper(&self) -> &'static str {
        match self {
            Self::Metric => "METRIC",
            Self::Tagk => "TAGK",
            Self::Tagv => "TAGV",
        }
    }
}

impl std::fmt::Display for UidKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Metric => "metric",
            Self::Tagk => "tagk",
            Self::Tagv => "tagv",
        })
    }
}

/// Metadata for one UID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UidMeta {
    pub uid: String,
    pub name: String,
    /// Unix timestamp in seconds
    pub created: i64,
}

/// One `key=value` term of a search lookup; either side may be `*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTag {
    pub key: String,
    pub value: String,
}

/// Parsed search lookup query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LookupQuery {
    pub metric: Option<String>,
    pub tags: Vec<LookupTag>,
}

/// Series descriptor returned by a search lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub tsuid: String,
    pub metric: String,
    pub tags: BTreeMap<String, String>,
}

/// A point submitted through `/api/put`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingPoint {
    pub metric: String,
    /// Seconds or milliseconds since the epoch
    pub timestamp: i64,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Storage and metadata collaborator consumed by the query engine
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch raw series for a metric over a time range
    async fn query_series(&self, query: &SeriesQuery) -> BackendResult<Vec<RawSeries>>;

    /// Annotations attached to the given series
    async fn query_annotations(
        &self,
        _range: TimeRange,
        _bucket_ms: Option<i64>,
        _series: &[RawSeries],
    ) -> BackendResult<Vec<Annotation>> {
        Ok(Vec::new())
    }

    /// Annotations not attached to any series
    async fn query_global_annotations(&self, _range: TimeRange) -> BackendResult<Vec<Annotation>> {
        Ok(Vec::new())
    }

    async fn suggest_metrics(&self, _prefix: &str, _max: usize) -> BackendResult<Vec<String>> {
        Err(BackendError::Unsupported("suggestMetrics"))
    }

    async fn suggest_tag_keys(&self, _prefix: &str, _max: usize) -> BackendResult<Vec<String>> {
        Err(BackendError::Unsupported("suggestTagKeys"))
    }

    async fn suggest_tag_values(&self, _prefix: &str, _max: usize) -> BackendResult<Vec<String>> {
        Err(BackendError::Unsupported("suggestTagValues"))
    }

    /// Metadata for a UID, `None` when unknown
    async fn uid_meta(&self, _kind: UidKind, _uid: &str) -> BackendResult<Option<UidMeta>> {
        Err(BackendError::Unsupported("uidMetaFromUid"))
    }

    async fn search_lookup(
        &self,
        _query: &LookupQuery,
        _limit: Option<usize>,
        _use_meta: bool,
    ) -> BackendResult<Vec<LookupResult>> {
        Err(BackendError::Unsupported("searchLookup"))
    }

    /// Store points, reporting success or failure per point in input order
    async fn store_points(
        &self,
        _points: Vec<IncomingPoint>,
    ) -> BackendResult<Vec<Result<(), String>>> {
        Err(BackendError::Unsupported("storePoints"))
    }

    async fn store_annotations(&self, _annotations: Vec<Annotation>) -> BackendResult<Vec<Annotation>> {
        Err(BackendError::Unsupported("storeAnnotations"))
    }

    async fn delete_annotation(&self, _annotation: &Annotation) -> BackendResult<()> {
        Err(BackendError::Unsupported("deleteAnnotation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SeriesOnly;

    #[async_trait]
    impl Backend for SeriesOnly {
        async fn query_series(&self, _query: &SeriesQuery) -> BackendResult<Vec<RawSeries>> {
            Ok(vec![RawSeries::new("m", "000001").point(1000, 1.0)])
        }
    }

    #[test]
    fn test_error_status() {
        assert_eq!(BackendError::Unsupported("storePoints").status(), 501);
        assert_eq!(BackendError::operation("boom").status(), 500);
        let err = BackendError::Operation {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.status(), 503);
        assert_eq!(err.to_string(), "unavailable");
    }

    #[tokio::test]
    async fn test_default_capabilities() {
        let backend = SeriesOnly;
        let range = TimeRange::new(0, 10_000);

        assert!(backend.query_global_annotations(range).await.unwrap().is_empty());
        assert!(matches!(
            backend.store_points(vec![]).await,
            Err(BackendError::Unsupported("storePoints"))
        ));
        assert!(matches!(
            backend.suggest_metrics("", 10).await,
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn test_uid_kind() {
        assert_eq!(UidKind::from_name("TAGK"), Some(UidKind::Tagk));
        assert_eq!(UidKind::from_name("metric"), Some(UidKind::Metric));
        assert_eq!(UidKind::from_name("host"), None);
        assert_eq!(UidKind::Tagv.as_upper(), "TAGV");
    }

    #[test]
    fn test_annotation_wire_shape() {
        let annotation = Annotation {
            tsuid: Some("000001000001000001".to_string()),
            description: "deploy".to_string(),
            notes: String::new(),
            custom: None,
            start_time: 1369141261,
            end_time: None,
        };
        let json = serde_json::to_value(&annotation).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tsuid": "000001000001000001",
                "description": "deploy",
                "notes": "",
                "startTime": 1369141261
            })
        );
        assert!(annotation.overlaps(1369141000, 1369142000));
        assert!(!annotation.overlaps(1369142000, 1369143000));
    }
}
