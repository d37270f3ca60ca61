//! Query Engine
//!
//! Turns OpenTSDB-style metric-query tokens and series expressions into
//! combined output series:
//!
//! - **AST**: Typed query model (aggregators, filters, downsample, rate)
//! - **Parser**: Metric-query tokens, downsample specs, search-lookup queries
//! - **Filter / Grouping**: Tag predicates and group-by tag sets
//! - **Downsample / Combine**: Bucketing, interpolation, aggregation, rate
//! - **Expression**: `sumSeries(...)`, `highestMax(...)` and friends
//! - **Executor**: Runs the pipeline against a [`Backend`](crate::backend::Backend)
//!
//! # Query Language
//!
//! ```text
//! <aggregator>:[rate[{counter[,max[,reset]]}]:][<N><unit>-<fn>[-<fill>]:]<metric>[{tagk=filter,...}]
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let executor = QueryExecutor::new(backend, QueryConfig::default());
//! let series = executor
//!     .execute_str(
//!         Some("1h-ago"),
//!         None,
//!         &["sum:10s-avg:sys.cpu{host=*}".to_string()],
//!         QueryOptions::default(),
//!     )
//!     .await?;
//! ```

pub mod ast;
pub mod combine;
pub mod downsample;
mod error;
pub mod executor;
pub mod expression;
pub mod filter;
pub mod grouping;
pub mod parser;
pub mod series;
pub mod time;

pub use ast::{
    Aggregator, DownsampleSpec, FillPolicy, Filter, FilterKind, MetricQuery, RateOptions, TagSet,
};
pub use error::{QueryError, QueryResult};
pub use executor::{QueryExecutor, QueryOptions, QueryRequest};
pub use expression::{parse_expression, ExprFunction, Expression};
pub use parser::{parse_downsample, parse_lookup_query, parse_metric_query, parse_rate_options};
pub use series::{CombinedSeries, Dps, QueryEcho, Sample};
pub use time::{parse_time, TimeRange};
