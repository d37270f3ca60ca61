//! Query result model
//!
//! [`CombinedSeries`] is one element of the `/api/query` response array.
//! Its `dps` field is written either as `[[t, v], ...]` or as
//! `{"t": v, ...}` depending on the `arrays` flag.

use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::backend::Annotation;
use crate::query::ast::{Filter, MetricQuery, RateOptions, TagSet};

/// A timestamped value; `None` is emitted as `null` and NaN as a bare `NaN`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }

    pub fn null(timestamp: i64) -> Self {
        Self {
            timestamp,
            value: None,
        }
    }
}

/// Ordered data points of a result series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dps {
    pub samples: Vec<Sample>,
    /// Serialise as an array of pairs instead of a timestamp-keyed object
    pub arrays: bool,
}

impl Dps {
    pub fn new(samples: Vec<Sample>, arrays: bool) -> Self {
        Self { samples, arrays }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Value of the last point
    pub fn last_value(&self) -> Option<f64> {
        self.samples.last().and_then(|s| s.value)
    }
}

/// Struct name serde_json reserves for raw JSON fragments
const RAW_JSON_TOKEN: &str = "$serde_json::private::RawValue";

/// Point value as written on the wire
struct WireValue(Option<f64>);

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            // serde_json would write NaN as null
            Some(v) if v.is_nan() => {
                let mut raw = serializer.serialize_struct(RAW_JSON_TOKEN, 1)?;
                raw.serialize_field(RAW_JSON_TOKEN, "NaN")?;
                raw.end()
            }
            value => value.serialize(serializer),
        }
    }
}

impl Serialize for Dps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.arrays {
            let mut seq = serializer.serialize_seq(Some(self.samples.len()))?;
            for sample in &self.samples {
                seq.serialize_element(&(sample.timestamp, WireValue(sample.value)))?;
            }
            seq.end()
        } else {
            let mut map = serializer.serialize_map(Some(self.samples.len()))?;
            for sample in &self.samples {
                map.serialize_entry(&sample.timestamp.to_string(), &WireValue(sample.value))?;
            }
            map.end()
        }
    }
}

/// Echo of the metric query behind a result series (`show_query`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEcho {
    pub aggregator: String,
    pub metric: String,
    pub tsuids: Option<Vec<String>>,
    pub downsample: Option<String>,
    pub rate: bool,
    pub explicit_tags: bool,
    pub rate_options: Option<RateOptions>,
    pub tags: TagSet,
    pub filters: Vec<Filter>,
}

impl From<&MetricQuery> for QueryEcho {
    fn from(query: &MetricQuery) -> Self {
        Self {
            aggregator: query.aggregator.clone(),
            metric: query.metric.clone(),
            tsuids: None,
            downsample: query.downsample.as_ref().map(|d| d.raw.clone()),
            rate: query.rate,
            explicit_tags: false,
            rate_options: query.rate_options,
            tags: TagSet::new(),
            filters: query.filters.clone(),
        }
    }
}

/// One output series of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSeries {
    pub metric: String,
    pub tags: TagSet,
    pub aggregated_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsuids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryEcho>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_annotations: Option<Vec<Annotation>>,
    pub dps: Dps,
}

impl CombinedSeries {
    /// Series with no extras attached
    pub fn new(metric: impl Into<String>, tags: TagSet, aggregated_tags: Vec<String>, dps: Dps) -> Self {
        Self {
            metric: metric.into(),
            tags,
            aggregated_tags,
            tsuids: None,
            query: None,
            annotations: None,
            global_annotations: None,
            dps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Filter;
    use serde_json::json;

    fn dps(arrays: bool) -> Dps {
        Dps::new(
            vec![Sample::new(1000, 1.5), Sample::null(1010), Sample::new(1020, 2.0)],
            arrays,
        )
    }

    #[test]
    fn test_dps_as_arrays() {
        let json = serde_json::to_value(dps(true)).unwrap();
        assert_eq!(json, json!([[1000, 1.5], [1010, null], [1020, 2.0]]));
    }

    #[test]
    fn test_dps_as_map() {
        let json = serde_json::to_string(&dps(false)).unwrap();
        assert_eq!(json, r#"{"1000":1.5,"1010":null,"1020":2.0}"#);
    }

    #[test]
    fn test_nan_written_as_bare_token() {
        let samples = vec![Sample::new(1000, f64::NAN), Sample::null(1010), Sample::new(1020, 2.0)];

        let json = serde_json::to_string(&Dps::new(samples.clone(), true)).unwrap();
        assert_eq!(json, "[[1000,NaN],[1010,null],[1020,2.0]]");

        let json = serde_json::to_string(&Dps::new(samples, false)).unwrap();
        assert_eq!(json, r#"{"1000":NaN,"1010":null,"1020":2.0}"#);
    }

    #[test]
    fn test_combined_series_skips_absent_extras() {
        let series = CombinedSeries::new("cpu", TagSet::new(), vec!["host".into()], dps(true));
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(
            json,
            json!({
                "metric": "cpu",
                "tags": {},
                "aggregatedTags": ["host"],
                "dps": [[1000, 1.5], [1010, null], [1020, 2.0]]
            })
        );
    }

    #[test]
    fn test_query_echo() {
        let query = MetricQuery::new("sum", "cpu").with_filter(Filter::literal_or("host", "a"));
        let json = serde_json::to_value(QueryEcho::from(&query)).unwrap();
        assert_eq!(
            json,
            json!({
                "aggregator": "sum",
                "metric": "cpu",
                "tsuids": null,
                "downsample": null,
                "rate": false,
                "explicitTags": false,
                "rateOptions": null,
                "tags": {},
                "filters": [{"tagk": "host", "type": "literal_or", "filter": "a", "groupBy": true}]
            })
        );
    }
}
