//! Query Parser
//!
//! Parses OpenTSDB metric-query tokens into [`MetricQuery`] values.
//!
//! # Supported Syntax
//!
//! ```text
//! AGG:[rate[{counter[,max[,reset]]}]:][N<unit>[-func[-fill]]:]METRIC[{tagk=filter,...}]
//! ```
//!
//! # Examples
//!
//! ```text
//! sum:sys.cpu.user
//! avg:1m-avg:sys.cpu.user{host=web01|web02}
//! sum:rate{counter,65535}:10s-max-zero:if.octets{host=*}
//! ```
//!
//! Search lookup queries (`metric{key=value,...}` with `*` allowed on either
//! side of a pair) are parsed by [`parse_lookup_query`].

use nom::{
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::backend::{LookupQuery, LookupTag};
use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};

const NO_QUERY: &str = "You must specify a query";
const EMPTY_QUERY: &str = "You must specify at least one metric, tagk or tagv in your query";

/// Parse a metric-query token into a [`MetricQuery`]
///
/// The aggregator name is kept as written; it is resolved when series are
/// combined.
pub fn parse_metric_query(input: &str) -> QueryResult<MetricQuery> {
    let input = input.trim();
    let segments = split_top_level(input, ':');

    if segments.len() < 2 || segments.len() > 4 {
        return Err(QueryError::Parse(format!(
            "Expected 'aggregator:[rate:][downsample:]metric', got '{}'",
            input
        )));
    }

    let aggregator = segments[0].trim();
    if aggregator.is_empty() {
        return Err(QueryError::Parse(format!("Missing aggregator in '{}'", input)));
    }

    let has_rate = segments.len() > 2 && segments[1].starts_with("rate");
    let (rate_options, downsample) = match (has_rate, segments.len()) {
        (true, 4) => (parse_rate_options(segments[1])?, Some(segments[2])),
        (true, _) => (parse_rate_options(segments[1])?, None),
        (false, 3) => (None, Some(segments[1])),
        (false, 2) => (None, None),
        (false, _) => {
            return Err(QueryError::Parse(format!(
                "Unexpected segment '{}' in '{}'",
                segments[1], input
            )))
        }
    };

    let (metric, filters) = parse_metric_and_tags(segments[segments.len() - 1])?;

    let mut query = MetricQuery::new(aggregator, metric);
    if has_rate {
        query = query.with_rate(rate_options);
    }
    if let Some(spec) = downsample {
        query = query.with_downsample(parse_downsample(spec)?);
    }
    query.filters = filters;

    Ok(query)
}

/// Split on `sep` wherever it appears outside `{...}`
pub(crate) fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Parse `metric{k=v,...}` into the metric name and its grouping filters
fn parse_metric_and_tags(input: &str) -> QueryResult<(String, Vec<Filter>)> {
    let input = input.trim();
    let Some(open) = input.find('{') else {
        if input.is_empty() || input.contains('}') {
            return Err(QueryError::Parse(format!("Invalid metric '{}'", input)));
        }
        return Ok((input.to_string(), Vec::new()));
    };

    let metric = &input[..open];
    if metric.is_empty() {
        return Err(QueryError::Parse(format!("Missing metric name in '{}'", input)));
    }

    let body = input[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| QueryError::Parse(format!("Unterminated tag filter in '{}'", input)))?;

    if body.contains('{') || body.contains('}') {
        return Err(QueryError::Parse(format!(
            "Only one tag filter group is supported in '{}'",
            input
        )));
    }

    let mut filters = Vec::new();
    if body.trim().is_empty() {
        return Ok((metric.to_string(), filters));
    }

    for term in body.split(',') {
        let (key, value) = term
            .split_once('=')
            .ok_or_else(|| QueryError::Parse(format!("Invalid tag filter '{}'", term)))?;
        if key.is_empty() {
            return Err(QueryError::Parse(format!("Missing tag key in '{}'", term)));
        }

        filters.push(Filter::from_tag(key, value));
    }

    Ok((metric.to_string(), filters))
}

/// Parse a `rate` segment; `rate` alone carries no options
pub fn parse_rate_options(input: &str) -> QueryResult<Option<RateOptions>> {
    let body = match all_consuming(rate_segment)(input.trim()) {
        Ok((_, body)) => body,
        Err(_) => {
            return Err(QueryError::Parse(format!("Invalid rate specification '{}'", input)))
        }
    };

    let Some(body) = body else {
        return Ok(None);
    };

    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() > 3 {
        return Err(QueryError::Parse(format!("Too many rate options in '{}'", input)));
    }

    let number = |s: &str| -> QueryResult<Option<i64>> {
        if s.is_empty() {
            return Ok(None);
        }
        s.parse()
            .map(Some)
            .map_err(|_| QueryError::Parse(format!("Invalid rate option '{}'", s)))
    };

    let counter = match parts[0] {
        "counter" => true,
        "" => false,
        other => {
            return Err(QueryError::Parse(format!("Invalid rate option '{}'", other)));
        }
    };

    Ok(Some(RateOptions {
        counter,
        counter_max: parts.get(1).map(|s| number(s)).transpose()?.flatten(),
        reset_value: parts.get(2).map(|s| number(s)).transpose()?.flatten(),
    }))
}

fn rate_segment(input: &str) -> IResult<&str, Option<&str>> {
    preceded(
        tag("rate"),
        opt(delimited(char('{'), take_while(|c: char| c != '}'), char('}'))),
    )(input)
}

/// Parse a `<N><unit>[-function[-fill]]` downsample specification
pub fn parse_downsample(input: &str) -> QueryResult<DownsampleSpec> {
    let raw = input.trim();
    let mut parts = raw.split('-');

    let interval = parts.next().unwrap_or_default();
    let (count, unit) = match all_consuming(interval_term)(interval) {
        Ok((_, term)) => term,
        Err(_) => {
            return Err(QueryError::InvalidDownsample(format!(
                "invalid interval '{}'",
                interval
            )))
        }
    };

    let interval_ms = match unit_seconds(unit) {
        Some(seconds) => count.saturating_mul(seconds).saturating_mul(1000),
        None => {
            tracing::warn!("unrecognized downsample unit: {}", unit);
            count
        }
    };
    if interval_ms <= 0 {
        return Err(QueryError::InvalidDownsample(format!(
            "interval must be positive in '{}'",
            raw
        )));
    }

    let function = match parts.next() {
        Some(name) => Aggregator::from_name(name).map_err(|_| {
            QueryError::InvalidDownsample(format!("unknown downsample function '{}'", name))
        })?,
        None => Aggregator::Avg,
    };

    let fill = match parts.next() {
        Some(name) => FillPolicy::from_name(name)?,
        None => FillPolicy::None,
    };

    if let Some(extra) = parts.next() {
        return Err(QueryError::InvalidDownsample(format!(
            "unexpected '{}' in '{}'",
            extra, raw
        )));
    }

    Ok(DownsampleSpec {
        interval_ms,
        function,
        fill,
        raw: raw.to_string(),
    })
}

fn interval_term(input: &str) -> IResult<&str, (i64, &str)> {
    pair(
        map_res(digit1, |s: &str| s.parse::<i64>()),
        take_while(|c: char| c.is_ascii_alphabetic()),
    )(input)
}

fn unit_seconds(unit: &str) -> Option<i64> {
    match unit {
        "s" => Some(1),
        "m" => Some(60),
        "h" => Some(3600),
        "d" => Some(86_400),
        "w" => Some(604_800),
        "y" => Some(31_536_000),
        _ => None,
    }
}

/// Parse a search lookup query such as `some.metric{host=*,*=web01}`
pub fn parse_lookup_query(input: Option<&str>) -> QueryResult<LookupQuery> {
    let input = input
        .ok_or_else(|| QueryError::InvalidLookup(NO_QUERY.to_string()))?
        .trim();

    let (metric, body) = match input.find('{') {
        Some(open) => {
            let body = input[open + 1..].strip_suffix('}').ok_or_else(|| {
                QueryError::Parse(format!("Unterminated tag list in '{}'", input))
            })?;
            (&input[..open], body)
        }
        None => (input, ""),
    };

    let mut tags = Vec::new();
    for term in body.split(',').filter(|t| !t.trim().is_empty()) {
        let (key, value) = term
            .split_once('=')
            .ok_or_else(|| QueryError::Parse(format!("Invalid tag pair '{}'", term)))?;
        tags.push(LookupTag {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        });
    }

    let metric = Some(metric.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    if metric.is_none() && tags.is_empty() {
        return Err(QueryError::InvalidLookup(EMPTY_QUERY.to_string()));
    }

    Ok(LookupQuery { metric, tags })
}
