//! Query model
//!
//! Typed representation of one OpenTSDB metric query:
//!
//! ```text
//! sum:rate{counter,1000}:1m-avg-zero:sys.cpu.user{host=web*,dc=lga|sjc}
//! ^agg ^rate + options   ^downsample  ^metric     ^grouping filters
//! ```
//!
//! Aggregator, downsample function and fill policy names are resolved into
//! enums here so that an unknown name is rejected with a typed error instead
//! of failing a table lookup later on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::query::error::{QueryError, QueryResult};

/// Group-by tag combination identifying one output series
pub type TagSet = BTreeMap<String, String>;

/// Aggregation functions shared by downsampling and cross-series combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    /// Average of values
    Avg,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Number of values
    Count,
}

impl Aggregator {
    /// Every supported aggregator, in the order `/api/aggregators` reports them
    pub const ALL: [Aggregator; 5] = [
        Aggregator::Avg,
        Aggregator::Sum,
        Aggregator::Min,
        Aggregator::Max,
        Aggregator::Count,
    ];

    /// Resolve an aggregator name
    pub fn from_name(name: &str) -> QueryResult<Self> {
        match name {
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(QueryError::UnknownAggregator(other.to_string())),
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Apply aggregation to a slice of values
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        Some(match self {
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Count => values.len() as f64,
        })
    }
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to emit for a downsample bucket that holds no points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Omit the bucket
    #[default]
    None,
    /// Emit NaN
    Nan,
    /// Emit null
    Null,
    /// Emit 0
    Zero,
}

impl FillPolicy {
    /// Resolve a fill policy name
    pub fn from_name(name: &str) -> QueryResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "nan" => Ok(Self::Nan),
            "null" => Ok(Self::Null),
            "zero" => Ok(Self::Zero),
            other => Err(QueryError::InvalidDownsample(format!(
                "unknown fill policy '{}'",
                other
            ))),
        }
    }
}

/// Parsed `<N><unit>[-function[-fill]]` downsample specification
#[derive(Debug, Clone, PartialEq)]
pub struct DownsampleSpec {
    /// Bucket width in milliseconds
    pub interval_ms: i64,
    /// Function reducing the points of one bucket
    pub function: Aggregator,
    /// Policy for empty buckets
    pub fill: FillPolicy,
    /// Specification as written by the caller
    pub raw: String,
}

impl DownsampleSpec {
    /// Start of the bucket containing `timestamp`
    pub fn align(&self, timestamp: i64) -> i64 {
        if self.interval_ms <= 0 {
            return timestamp;
        }
        timestamp.div_euclid(self.interval_ms) * self.interval_ms
    }

    /// First bucket boundary at or after `timestamp`
    pub fn align_up(&self, timestamp: i64) -> i64 {
        let down = self.align(timestamp);
        if down == timestamp {
            down
        } else {
            down.saturating_add(self.interval_ms)
        }
    }
}

impl std::fmt::Display for DownsampleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Options carried by a `rate{counter,max,reset}` segment
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOptions {
    /// Values are monotonically increasing counters that may roll over
    #[serde(default)]
    pub counter: bool,
    /// Value at which the counter rolls over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_max: Option<i64>,
    /// Rates above this value are reported as zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_value: Option<i64>,
}

/// Tag-value filter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    #[serde(rename = "literal_or")]
    LiteralOr,
    #[serde(rename = "iliteral_or")]
    ILiteralOr,
    #[serde(rename = "not_literal_or")]
    NotLiteralOr,
    #[serde(rename = "not_iliteral_or")]
    NotILiteralOr,
    #[serde(rename = "wildcard")]
    Wildcard,
    #[serde(rename = "iwildcard")]
    IWildcard,
    #[serde(rename = "regexp")]
    Regexp,
}

impl FilterKind {
    /// Resolve a filter type name
    pub fn from_name(name: &str) -> QueryResult<Self> {
        match name {
            "literal_or" => Ok(Self::LiteralOr),
            "iliteral_or" => Ok(Self::ILiteralOr),
            "not_literal_or" => Ok(Self::NotLiteralOr),
            "not_iliteral_or" => Ok(Self::NotILiteralOr),
            "wildcard" => Ok(Self::Wildcard),
            "iwildcard" => Ok(Self::IWildcard),
            "regexp" => Ok(Self::Regexp),
            other => Err(QueryError::InvalidFilter(format!(
                "unknown filter type '{}'",
                other
            ))),
        }
    }

    /// Case-insensitive variants
    pub fn ignores_case(&self) -> bool {
        matches!(self, Self::ILiteralOr | Self::NotILiteralOr | Self::IWildcard)
    }
}

/// A tag-value filter
///
/// `filter` holds either a pipe-separated value list (literal kinds) or a
/// single pattern (wildcard and regexp kinds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Tag key the filter applies to
    pub tagk: String,
    /// Filter kind
    #[serde(rename = "type")]
    pub kind: FilterKind,
    /// Values or pattern
    pub filter: String,
    /// Whether the tag participates in grouping
    #[serde(rename = "groupBy", default)]
    pub group_by: bool,
}

impl Filter {
    /// Create a new filter
    pub fn new(
        tagk: impl Into<String>,
        kind: FilterKind,
        filter: impl Into<String>,
        group_by: bool,
    ) -> Self {
        Self {
            tagk: tagk.into(),
            kind,
            filter: filter.into(),
            group_by,
        }
    }

    /// Grouping `literal_or` filter over pipe-separated values
    pub fn literal_or(tagk: impl Into<String>, values: impl Into<String>) -> Self {
        Self::new(tagk, FilterKind::LiteralOr, values, true)
    }

    /// Grouping `wildcard` filter
    pub fn wildcard(tagk: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(tagk, FilterKind::Wildcard, pattern, true)
    }

    /// Grouping filter for a `tagk=value` pair as written inside braces
    pub fn from_tag(tagk: impl Into<String>, value: &str) -> Self {
        if value.contains('*') {
            Self::wildcard(tagk, value)
        } else {
            Self::literal_or(tagk, value)
        }
    }

    /// Values of a literal filter
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.filter.split('|')
    }
}

/// One parsed metric query
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    /// Cross-series aggregator name, resolved when series are combined
    pub aggregator: String,
    /// Convert combined values into a per-second rate
    pub rate: bool,
    /// Options from a `rate{...}` segment
    pub rate_options: Option<RateOptions>,
    /// Optional downsampling
    pub downsample: Option<DownsampleSpec>,
    /// Metric name
    pub metric: String,
    /// Tag filters
    pub filters: Vec<Filter>,
}

impl MetricQuery {
    /// Create a query for a metric with no rate, downsampling or filters
    pub fn new(aggregator: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            aggregator: aggregator.into(),
            rate: false,
            rate_options: None,
            downsample: None,
            metric: metric.into(),
            filters: Vec::new(),
        }
    }

    /// Request rate conversion
    pub fn with_rate(mut self, options: Option<RateOptions>) -> Self {
        self.rate = true;
        self.rate_options = options;
        self
    }

    /// Add downsampling
    pub fn with_downsample(mut self, spec: DownsampleSpec) -> Self {
        self.downsample = Some(spec);
        self
    }

    /// Add a filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}
