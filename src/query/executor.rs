//! Query Executor
//!
//! Drives one metric query through the pipeline:
//!
//! ```text
//! Parse → Fetch (backend) → Filter → Group → per tag set: Annotate → Downsample → Combine
//! ```
//!
//! Queries, tag sets and backend calls run strictly in order, so results for
//! query N always precede those of query N + 1. Global annotations are
//! fetched once per request and attached to every series.

use std::sync::Arc;

use crate::backend::{Annotation, Backend, SeriesQuery};
use crate::config::QueryConfig;
use crate::query::ast::{Aggregator, MetricQuery};
use crate::query::combine::{combine, CombineContext, SampledSeries};
use crate::query::downsample::{check_bucket_count, downsample, passthrough};
use crate::query::error::QueryResult;
use crate::query::expression::{evaluate, parse_expression};
use crate::query::filter::apply_filters;
use crate::query::grouping::{aggregated_tags, series_for_tag_set, unique_tag_sets};
use crate::query::parser::parse_metric_query;
use crate::query::series::{CombinedSeries, QueryEcho};
use crate::query::time::TimeRange;

/// Response shaping flags shared by `/api/query` and `/api/query/gexp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Emit `dps` as `[[t, v], ...]`
    pub arrays: bool,
    /// Keep millisecond timestamps
    pub ms_resolution: bool,
    pub show_query: bool,
    pub show_tsuids: bool,
    /// Attach per-series annotations
    pub annotations: bool,
    /// Attach global annotations
    pub global_annotations: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            arrays: false,
            ms_resolution: false,
            show_query: false,
            show_tsuids: false,
            annotations: true,
            global_annotations: false,
        }
    }
}

/// A full query request
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    pub queries: Vec<MetricQuery>,
    pub options: QueryOptions,
}

/// Query executor
pub struct QueryExecutor {
    backend: Arc<dyn Backend>,
    config: QueryConfig,
}

impl QueryExecutor {
    /// Create a new executor
    pub fn new(backend: Arc<dyn Backend>, config: QueryConfig) -> Self {
        Self { backend, config }
    }

    /// Execute a request of already parsed metric queries
    pub async fn execute(&self, request: &QueryRequest) -> QueryResult<Vec<CombinedSeries>> {
        let range = TimeRange::resolve(request.start.as_deref(), request.end.as_deref())?;
        self.execute_in_range(range, &request.queries, request.options)
            .await
    }

    /// Parse and execute metric-query tokens
    pub async fn execute_str(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        tokens: &[String],
        options: QueryOptions,
    ) -> QueryResult<Vec<CombinedSeries>> {
        let range = TimeRange::resolve(start, end)?;
        let queries = tokens
            .iter()
            .map(|t| parse_metric_query(t))
            .collect::<QueryResult<Vec<_>>>()?;
        self.execute_in_range(range, &queries, options).await
    }

    /// Execute queries over a resolved range
    pub async fn execute_in_range(
        &self,
        range: TimeRange,
        queries: &[MetricQuery],
        options: QueryOptions,
    ) -> QueryResult<Vec<CombinedSeries>> {
        let global = self.global_annotations(range, options).await?;

        let mut out = Vec::new();
        for query in queries {
            out.extend(
                self.run_metric_query(range, query, options, global.as_deref())
                    .await?,
            );
        }
        Ok(out)
    }

    /// Evaluate expression strings such as `sumSeries(sum:a,sum:b)`
    pub async fn execute_expressions(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        expressions: &[String],
        options: QueryOptions,
    ) -> QueryResult<Vec<CombinedSeries>> {
        let range = TimeRange::resolve(start, end)?;
        let parsed = expressions
            .iter()
            .map(|e| parse_expression(e))
            .collect::<QueryResult<Vec<_>>>()?;

        let global = self.global_annotations(range, options).await?;

        let mut out = Vec::new();
        for expr in &parsed {
            tracing::debug!("Evaluating expression: {}", expr.text);
            let inner = QueryOptions {
                arrays: expr.function.array_output(),
                ..options
            };

            let mut results = Vec::with_capacity(expr.metrics.len());
            for token in &expr.metrics {
                let query = parse_metric_query(token)?;
                results.push(
                    self.run_metric_query(range, &query, inner, global.as_deref())
                        .await?,
                );
            }
            out.extend(evaluate(expr, results, options.ms_resolution, options.arrays));
        }
        Ok(out)
    }

    async fn global_annotations(
        &self,
        range: TimeRange,
        options: QueryOptions,
    ) -> QueryResult<Option<Vec<Annotation>>> {
        if !options.global_annotations {
            return Ok(None);
        }
        Ok(Some(self.backend.query_global_annotations(range).await?))
    }

    async fn run_metric_query(
        &self,
        range: TimeRange,
        query: &MetricQuery,
        options: QueryOptions,
        global: Option<&[Annotation]>,
    ) -> QueryResult<Vec<CombinedSeries>> {
        self.log_query(query);
        if let Some(spec) = &query.downsample {
            check_bucket_count(range, spec)?;
        }

        let raw = self
            .backend
            .query_series(&SeriesQuery {
                range,
                downsample: query.downsample.as_ref().map(|d| d.raw.clone()),
                metric: query.metric.clone(),
                filters: query.filters.clone(),
            })
            .await?;
        let raw = apply_filters(raw, &query.filters);

        let tag_sets = unique_tag_sets(&raw, &query.filters);
        if self.config.verbose {
            tracing::debug!(tag_sets = ?tag_sets, series = raw.len(), "grouped");
        }

        let mut out = Vec::with_capacity(tag_sets.len());
        for tag_set in tag_sets {
            let participating = series_for_tag_set(&raw, &tag_set);
            if participating.is_empty() {
                continue;
            }
            let aggregator = Aggregator::from_name(&query.aggregator)?;
            let aggregated = aggregated_tags(&participating, &tag_set);

            let annotations = if options.annotations {
                let owned: Vec<_> = participating.iter().map(|s| (*s).clone()).collect();
                let bucket_ms = query.downsample.as_ref().map(|d| d.interval_ms);
                Some(
                    self.backend
                        .query_annotations(range, bucket_ms, &owned)
                        .await?,
                )
            } else {
                None
            };

            let sampled = participating
                .iter()
                .map(|s| SampledSeries {
                    tsuid: s.tsuid.clone(),
                    samples: match &query.downsample {
                        Some(spec) => downsample(&s.dps, range, spec),
                        None => passthrough(&s.dps),
                    },
                })
                .collect();

            let mut series = combine(
                sampled,
                CombineContext {
                    metric: query.metric.clone(),
                    tag_set,
                    aggregated_tags: aggregated,
                    aggregator,
                    rate: query.rate.then(|| query.rate_options.unwrap_or_default()),
                    ms_resolution: options.ms_resolution,
                    arrays: options.arrays,
                    show_tsuids: options.show_tsuids,
                },
            );
            if options.show_query {
                series.query = Some(QueryEcho::from(query));
            }
            series.annotations = annotations;
            series.global_annotations = global.map(|g| g.to_vec());
            out.push(series);
        }

        Ok(out)
    }

    fn log_query(&self, query: &MetricQuery) {
        let downsample = query.downsample.as_ref().map(|d| d.raw.as_str());
        if self.config.verbose {
            tracing::debug!(
                metric = %query.metric,
                aggregator = %query.aggregator,
                rate = query.rate,
                downsample = ?downsample,
                filters = ?query.filters,
                "running metric query"
            );
        } else {
            tracing::trace!(
                metric = %query.metric,
                aggregator = %query.aggregator,
                rate = query.rate,
                downsample = ?downsample,
                "running metric query"
            );
        }
    }
}
