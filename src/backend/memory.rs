//! In-memory backend
//!
//! Reference implementation of every [`Backend`] capability, used by the
//! binary, the HTTP tests and the benches.
//!
//! Names are mapped to 6-hex-digit UIDs per namespace (metric, tagk, tagv) in
//! order of first appearance. A series' tsuid is the metric UID followed by
//! its tagk/tagv UID pairs sorted by tagk UID.
//!
//! Thread-safe via Tokio's async RwLock.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

use super::{
    Annotation, Backend, BackendError, BackendResult, IncomingPoint, LookupQuery, LookupResult,
    RawPoint, RawSeries, SeriesQuery, UidKind, UidMeta,
};
use crate::query::TimeRange;

/// Results returned by a search lookup without an explicit limit
pub const DEFAULT_LOOKUP_LIMIT: usize = 25;

/// Timestamps with more digits than this are milliseconds
const MAX_SECONDS_TIMESTAMP: i64 = 9_999_999_999;

/// Name to UID table for one namespace
#[derive(Debug, Default)]
struct UidTable {
    /// Metadata indexed by name, sorted for prefix scans
    by_name: BTreeMap<String, UidMeta>,
    /// UID to name lookup
    by_uid: HashMap<String, String>,
}

impl UidTable {
    /// Return the UID for `name`, assigning the next one if unknown
    fn assign(&mut self, name: &str, created: i64) -> String {
        if let Some(meta) = self.by_name.get(name) {
            return meta.uid.clone();
        }

        let uid = format!("{:06X}", self.by_name.len() + 1);
        self.by_uid.insert(uid.clone(), name.to_string());
        self.by_name.insert(
            name.to_string(),
            UidMeta {
                uid: uid.clone(),
                name: name.to_string(),
                created,
            },
        );
        uid
    }

    fn meta(&self, uid: &str) -> Option<&UidMeta> {
        self.by_uid.get(uid).and_then(|name| self.by_name.get(name))
    }

    fn suggest(&self, prefix: &str, max: usize) -> Vec<String> {
        self.by_name
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .take(max)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Everything the backend stores
#[derive(Debug, Default)]
struct MemoryState {
    metrics: UidTable,
    tagks: UidTable,
    tagvs: UidTable,
    /// Series indexed by tsuid
    series: BTreeMap<String, RawSeries>,
    annotations: Vec<Annotation>,
}

impl MemoryState {
    fn table(&self, kind: UidKind) -> &UidTable {
        match kind {
            UidKind::Metric => &self.metrics,
            UidKind::Tagk => &self.tagks,
            UidKind::Tagv => &self.tagvs,
        }
    }

    /// Validate and store one point
    fn insert(&mut self, point: IncomingPoint, now: i64) -> Result<(), String> {
        validate(&point)?;

        let timestamp = if point.timestamp.abs() <= MAX_SECONDS_TIMESTAMP {
            point.timestamp * 1000
        } else {
            point.timestamp
        };

        let mut tsuid = self.metrics.assign(&point.metric, now);
        let mut pairs: Vec<(String, String)> = point
            .tags
            .iter()
            .map(|(k, v)| (self.tagks.assign(k, now), self.tagvs.assign(v, now)))
            .collect();
        pairs.sort();
        for (k, v) in pairs {
            tsuid.push_str(&k);
            tsuid.push_str(&v);
        }

        let series = self
            .series
            .entry(tsuid.clone())
            .or_insert_with(|| RawSeries {
                metric: point.metric.clone(),
                tags: point.tags.clone(),
                tsuid,
                dps: Vec::new(),
            });

        match series.dps.binary_search_by_key(&timestamp, |p| p.timestamp) {
            Ok(i) => series.dps[i].value = point.value,
            Err(i) => series.dps.insert(i, RawPoint::new(timestamp, point.value)),
        }
        Ok(())
    }

    fn insert_all(&mut self, points: Vec<IncomingPoint>) -> Vec<Result<(), String>> {
        let now = chrono::Utc::now().timestamp();
        points.into_iter().map(|p| self.insert(p, now)).collect()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

fn validate(point: &IncomingPoint) -> Result<(), String> {
    if point.metric.is_empty() {
        return Err("Metric name was empty".to_string());
    }
    if !valid_name(&point.metric) {
        return Err(format!("Invalid metric name: {}", point.metric));
    }
    if point.tags.is_empty() {
        return Err("Missing tags".to_string());
    }
    for (k, v) in &point.tags {
        if !valid_name(k) || !valid_name(v) {
            return Err(format!("Invalid tag: {}={}", k, v));
        }
    }
    if point.timestamp <= 0 {
        return Err("Invalid timestamp".to_string());
    }
    if !point.value.is_finite() {
        return Err("Value was not a finite number".to_string());
    }
    Ok(())
}

fn lookup_matches(query: &LookupQuery, series: &RawSeries) -> bool {
    let metric_ok = match query.metric.as_deref() {
        None | Some("*") => true,
        Some(m) => m == series.metric,
    };

    metric_ok
        && query.tags.iter().all(|t| match (t.key.as_str(), t.value.as_str()) {
            ("*", "*") => !series.tags.is_empty(),
            ("*", value) => series.tags.values().any(|v| v == value),
            (key, "*") => series.tags.contains_key(key),
            (key, value) => series.tags.get(key).map(String::as_str) == Some(value),
        })
}

/// Seed file entry: a whole series or a single point
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedEntry {
    Series {
        metric: String,
        #[serde(default)]
        tags: BTreeMap<String, String>,
        dps: Vec<RawPoint>,
    },
    Point(IncomingPoint),
}

/// In-memory storage and metadata backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend loaded from a JSON seed file
    ///
    /// The file holds an array of series objects (`{metric, tags, dps}`) or
    /// of points (`{metric, timestamp, value, tags}`), freely mixed.
    pub fn from_seed_file(path: &Path) -> BackendResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackendError::operation(format!("Failed to read seed file {:?}: {}", path, e))
        })?;
        let entries: Vec<SeedEntry> = serde_json::from_str(&content).map_err(|e| {
            BackendError::operation(format!("Failed to parse seed file {:?}: {}", path, e))
        })?;

        let mut points = Vec::new();
        for entry in entries {
            match entry {
                SeedEntry::Series { metric, tags, dps } => {
                    points.extend(dps.into_iter().map(|p| IncomingPoint {
                        metric: metric.clone(),
                        timestamp: p.timestamp,
                        value: p.value,
                        tags: tags.clone(),
                    }));
                }
                SeedEntry::Point(point) => points.push(point),
            }
        }

        let mut backend = Self::new();
        let results = backend.state.get_mut().insert_all(points);
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!("Skipped {} invalid points from seed file {:?}", failed, path);
        }
        tracing::info!(
            "Loaded {} points from seed file {:?}",
            results.len() - failed,
            path
        );

        Ok(backend)
    }

    /// Number of stored series
    pub async fn series_count(&self) -> usize {
        self.state.read().await.series.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn query_series(&self, query: &SeriesQuery) -> BackendResult<Vec<RawSeries>> {
        let state = self.state.read().await;

        Ok(state
            .series
            .values()
            .filter(|s| s.metric == query.metric)
            .filter_map(|s| {
                let dps: Vec<RawPoint> = s
                    .dps
                    .iter()
                    .filter(|p| query.range.contains(p.timestamp))
                    .copied()
                    .collect();
                (!dps.is_empty()).then(|| RawSeries {
                    metric: s.metric.clone(),
                    tags: s.tags.clone(),
                    tsuid: s.tsuid.clone(),
                    dps,
                })
            })
            .collect())
    }

    async fn query_annotations(
        &self,
        range: TimeRange,
        _bucket_ms: Option<i64>,
        series: &[RawSeries],
    ) -> BackendResult<Vec<Annotation>> {
        let (start, end) = range.as_seconds();
        let state = self.state.read().await;

        Ok(state
            .annotations
            .iter()
            .filter(|a| {
                a.tsuid
                    .as_deref()
                    .is_some_and(|t| series.iter().any(|s| s.tsuid == t))
            })
            .filter(|a| a.overlaps(start, end))
            .cloned()
            .collect())
    }

    async fn query_global_annotations(&self, range: TimeRange) -> BackendResult<Vec<Annotation>> {
        let (start, end) = range.as_seconds();
        let state = self.state.read().await;

        Ok(state
            .annotations
            .iter()
            .filter(|a| a.tsuid.is_none() && a.overlaps(start, end))
            .cloned()
            .collect())
    }

    async fn suggest_metrics(&self, prefix: &str, max: usize) -> BackendResult<Vec<String>> {
        Ok(self.state.read().await.metrics.suggest(prefix, max))
    }

    async fn suggest_tag_keys(&self, prefix: &str, max: usize) -> BackendResult<Vec<String>> {
        Ok(self.state.read().await.tagks.suggest(prefix, max))
    }

    async fn suggest_tag_values(&self, prefix: &str, max: usize) -> BackendResult<Vec<String>> {
        Ok(self.state.read().await.tagvs.suggest(prefix, max))
    }

    async fn uid_meta(&self, kind: UidKind, uid: &str) -> BackendResult<Option<UidMeta>> {
        let state = self.state.read().await;
        Ok(state.table(kind).meta(&uid.to_ascii_uppercase()).cloned())
    }

    async fn search_lookup(
        &self,
        query: &LookupQuery,
        limit: Option<usize>,
        _use_meta: bool,
    ) -> BackendResult<Vec<LookupResult>> {
        let state = self.state.read().await;

        Ok(state
            .series
            .values()
            .filter(|s| lookup_matches(query, s))
            .take(limit.unwrap_or(DEFAULT_LOOKUP_LIMIT))
            .map(|s| LookupResult {
                tsuid: s.tsuid.clone(),
                metric: s.metric.clone(),
                tags: s.tags.clone(),
            })
            .collect())
    }

    async fn store_points(
        &self,
        points: Vec<IncomingPoint>,
    ) -> BackendResult<Vec<Result<(), String>>> {
        let mut state = self.state.write().await;
        let results = state.insert_all(points);
        tracing::debug!(
            "Stored {} points ({} failed)",
            results.len(),
            results.iter().filter(|r| r.is_err()).count()
        );
        Ok(results)
    }

    async fn store_annotations(&self, annotations: Vec<Annotation>) -> BackendResult<Vec<Annotation>> {
        if annotations.iter().any(|a| a.start_time <= 0) {
            return Err(BackendError::Operation {
                status: 400,
                message: "Missing start time".to_string(),
            });
        }

        let mut state = self.state.write().await;
        for annotation in &annotations {
            match state
                .annotations
                .iter_mut()
                .find(|a| a.tsuid == annotation.tsuid && a.start_time == annotation.start_time)
            {
                Some(existing) => *existing = annotation.clone(),
                None => state.annotations.push(annotation.clone()),
            }
        }
        Ok(annotations)
    }

    async fn delete_annotation(&self, annotation: &Annotation) -> BackendResult<()> {
        let mut state = self.state.write().await;
        let before = state.annotations.len();
        state
            .annotations
            .retain(|a| !(a.tsuid == annotation.tsuid && a.start_time == annotation.start_time));

        if state.annotations.len() == before {
            return Err(BackendError::Operation {
                status: 404,
                message: "Unable to locate annotation in storage".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LookupTag;
    use std::io::Write;

    fn point(metric: &str, timestamp: i64, value: f64, tags: &[(&str, &str)]) -> IncomingPoint {
        IncomingPoint {
            metric: metric.to_string(),
            timestamp,
            value,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let results = backend
            .store_points(vec![
                point("sys.cpu.user", 1_000, 1.0, &[("host", "web01")]),
                point("sys.cpu.user", 1_010, 2.0, &[("host", "web01")]),
                point("sys.cpu.user", 1_000, 5.0, &[("host", "web02"), ("dc", "lga")]),
                point("sys.mem", 1_000, 9.0, &[("host", "web01")]),
            ])
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        backend
    }

    fn series_query(metric: &str, start: i64, end: i64) -> SeriesQuery {
        SeriesQuery {
            range: TimeRange::new(start, end),
            downsample: None,
            metric: metric.to_string(),
            filters: Vec::new(),
        }
    }

    async fn stored_tsuid(backend: &MemoryBackend, metric: &str, tags: &[(&str, &str)]) -> Option<String> {
        let state = backend.state.read().await;
        state
            .series
            .values()
            .find(|s| {
                s.metric == metric
                    && s.tags.len() == tags.len()
                    && tags
                        .iter()
                        .all(|(k, v)| s.tags.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|s| s.tsuid.clone())
    }

    #[tokio::test]
    async fn test_uid_assignment_and_tsuid() {
        let backend = seeded().await;

        assert_eq!(
            stored_tsuid(&backend, "sys.cpu.user", &[("host", "web01")]).await.as_deref(),
            Some("000001000001000001")
        );

        // dc is tagk 000002; lga (000002) was assigned before web02 (000003)
        assert_eq!(
            stored_tsuid(&backend, "sys.cpu.user", &[("host", "web02"), ("dc", "lga")])
                .await
                .as_deref(),
            Some("000001000001000003000002000002")
        );

        let meta = backend.uid_meta(UidKind::Metric, "000002").await.unwrap().unwrap();
        assert_eq!(meta.name, "sys.mem");
        assert!(backend.uid_meta(UidKind::Tagv, "0000FF").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_series_by_metric_and_range() {
        let backend = seeded().await;

        let series = backend
            .query_series(&series_query("sys.cpu.user", 0, 2_000_000))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].dps, vec![RawPoint::new(1_000_000, 1.0), RawPoint::new(1_010_000, 2.0)]);

        let series = backend
            .query_series(&series_query("sys.cpu.user", 1_005_000, 2_000_000))
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].dps.len(), 1);

        assert!(backend
            .query_series(&series_query("unknown", 0, i64::MAX))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_store_points_reports_per_point() {
        let backend = MemoryBackend::new();
        let results = backend
            .store_points(vec![
                point("ok", 1_500_000_000_123, 1.0, &[("host", "a")]),
                point("", 1_000, 1.0, &[("host", "a")]),
                point("no.tags", 1_000, 1.0, &[]),
                point("bad name", 1_000, 1.0, &[("host", "a")]),
                point("nan", 1_000, f64::NAN, &[("host", "a")]),
            ])
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert_eq!(results[1], Err("Metric name was empty".to_string()));
        assert_eq!(results[2], Err("Missing tags".to_string()));
        assert!(results[3].is_err());
        assert!(results[4].is_err());
        assert_eq!(backend.series_count().await, 1);

        // millisecond timestamps are kept as is
        let series = backend
            .query_series(&series_query("ok", 0, i64::MAX))
            .await
            .unwrap();
        assert_eq!(series[0].dps[0].timestamp, 1_500_000_000_123);
    }

    #[tokio::test]
    async fn test_suggest() {
        let backend = seeded().await;
        assert_eq!(
            backend.suggest_metrics("sys", 25).await.unwrap(),
            vec!["sys.cpu.user", "sys.mem"]
        );
        assert_eq!(backend.suggest_metrics("sys", 1).await.unwrap(), vec!["sys.cpu.user"]);
        assert_eq!(backend.suggest_tag_keys("", 25).await.unwrap(), vec!["dc", "host"]);
        assert_eq!(backend.suggest_tag_values("web", 25).await.unwrap(), vec!["web01", "web02"]);
        assert!(backend.suggest_metrics("zzz", 25).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_lookup() {
        let backend = seeded().await;

        let query = LookupQuery {
            metric: Some("sys.cpu.user".to_string()),
            tags: vec![LookupTag {
                key: "dc".to_string(),
                value: "*".to_string(),
            }],
        };
        let results = backend.search_lookup(&query, None, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tags["host"], "web02");

        let query = LookupQuery {
            metric: None,
            tags: vec![LookupTag {
                key: "*".to_string(),
                value: "web01".to_string(),
            }],
        };
        let results = backend.search_lookup(&query, None, false).await.unwrap();
        assert_eq!(results.len(), 2);

        let limited = backend.search_lookup(&query, Some(1), false).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_annotations() {
        let backend = seeded().await;
        let series = backend
            .query_series(&series_query("sys.cpu.user", 0, 2_000_000))
            .await
            .unwrap();

        let local = Annotation {
            tsuid: Some(series[0].tsuid.clone()),
            description: "deploy".to_string(),
            notes: String::new(),
            custom: None,
            start_time: 1_005,
            end_time: None,
        };
        let global = Annotation {
            tsuid: None,
            description: "outage".to_string(),
            notes: String::new(),
            custom: None,
            start_time: 900,
            end_time: Some(1_100),
        };
        backend
            .store_annotations(vec![local.clone(), global.clone()])
            .await
            .unwrap();

        let range = TimeRange::new(1_000_000, 2_000_000);
        assert_eq!(
            backend.query_annotations(range, None, &series[..1]).await.unwrap(),
            vec![local.clone()]
        );
        assert!(backend
            .query_annotations(range, None, &series[1..])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(backend.query_global_annotations(range).await.unwrap(), vec![global]);

        backend.delete_annotation(&local).await.unwrap();
        assert!(backend
            .query_annotations(range, None, &series[..1])
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            backend.delete_annotation(&local).await,
            Err(BackendError::Operation { status: 404, .. })
        ));
    }

    #[test]
    fn test_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"metric": "some.metric", "tags": {{"host": "host1"}}, "dps": [{{"timestamp": 1000, "value": 1.0}}, {{"timestamp": 2000, "value": 2.0}}]}},
                {{"metric": "other", "timestamp": 1000, "value": 3.0, "tags": {{"host": "host2"}}}}
            ]"#
        )
        .unwrap();

        let backend = MemoryBackend::from_seed_file(file.path()).unwrap();
        let state = backend.state.try_read().unwrap();
        assert_eq!(state.series.len(), 2);
        assert_eq!(state.metrics.suggest("", 10), vec!["other", "some.metric"]);

        let missing = MemoryBackend::from_seed_file(Path::new("/nonexistent/seed.json"));
        assert!(matches!(missing, Err(BackendError::Operation { status: 500, .. })));
    }
}
