//! Expression functions
//!
//! Graphite-style functions over the results of one or more metric queries,
//! as served by `/api/query/gexp`:
//!
//! ```text
//! absolute(<metric>)
//! scale(<metric>,<factor>)
//! movingAverage(<metric>,<points>|'<N><unit>')
//! highestMax(<metric>,<n>)
//! highestCurrent(<metric>,<n>)
//! sumSeries(<metric>[,<metricN>])
//! diffSeries(<metric>[,<metricN>])
//! multiplySeries(<metric>[,<metricN>])
//! divideSeries(<metric>[,<metricN>])
//! ```
//!
//! Metric arguments are full metric-query tokens, so argument splitting
//! tracks brace depth: `sumSeries(sum:a{x=1,y=2},sum:b)` has two arguments.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    sequence::{preceded, terminated},
    IResult,
};
use std::collections::{BTreeSet, HashMap};

use crate::query::error::{QueryError, QueryResult};
use crate::query::grouping::canonical_key;
use crate::query::parser::split_top_level;
use crate::query::series::{CombinedSeries, Dps, Sample};

/// Upper bound on metric arguments for the union functions
pub const MAX_UNION_METRICS: usize = 26;

/// Supported expression functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprFunction {
    Absolute,
    Scale,
    MovingAverage,
    HighestMax,
    HighestCurrent,
    SumSeries,
    DiffSeries,
    MultiplySeries,
    DivideSeries,
}

impl ExprFunction {
    pub fn from_name(name: &str) -> QueryResult<Self> {
        match name {
            "absolute" => Ok(Self::Absolute),
            "scale" => Ok(Self::Scale),
            "movingAverage" => Ok(Self::MovingAverage),
            "highestMax" => Ok(Self::HighestMax),
            "highestCurrent" => Ok(Self::HighestCurrent),
            "sumSeries" => Ok(Self::SumSeries),
            "diffSeries" => Ok(Self::DiffSeries),
            "multiplySeries" => Ok(Self::MultiplySeries),
            "divideSeries" => Ok(Self::DivideSeries),
            other => Err(QueryError::Expression(format!("Unknown function '{}'", other))),
        }
    }

    /// Maximum number of metric arguments
    pub fn max_metrics(&self) -> usize {
        match self {
            Self::SumSeries | Self::DiffSeries | Self::MultiplySeries | Self::DivideSeries => {
                MAX_UNION_METRICS
            }
            _ => 1,
        }
    }

    /// Whether a scalar argument follows the metrics
    pub fn takes_extra_arg(&self) -> bool {
        matches!(
            self,
            Self::Scale | Self::MovingAverage | Self::HighestMax | Self::HighestCurrent
        )
    }

    /// Native output is the array-of-pairs form
    pub fn array_output(&self) -> bool {
        self.max_metrics() == 1
    }
}

/// Window of a moving average
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    /// Last N points
    Points(usize),
    /// Trailing time span, in seconds
    Span(i64),
}

/// Parsed scalar argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprArgument {
    Factor(f64),
    Count(usize),
    Window(Window),
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Expression as written; names the result series
    pub text: String,
    pub function: ExprFunction,
    pub metrics: Vec<String>,
    pub argument: Option<ExprArgument>,
}

fn function_name(input: &str) -> IResult<&str, &str> {
    terminated(
        preceded(multispace0, take_while1(|c: char| c.is_ascii_alphanumeric())),
        preceded(multispace0, char('(')),
    )(input)
}

/// Parse `function(arg, ...)`
pub fn parse_expression(input: &str) -> QueryResult<Expression> {
    let text = input.trim();
    let (rest, name) = function_name(text)
        .map_err(|_| QueryError::Expression(format!("Expected 'function(...)', got '{}'", text)))?;
    let function = ExprFunction::from_name(name)?;

    let close = closing_paren(rest)
        .ok_or_else(|| QueryError::Expression(format!("Unbalanced parentheses in '{}'", text)))?;
    if !rest[close + 1..].trim().is_empty() {
        return Err(QueryError::Expression(format!(
            "Unexpected input after expression: '{}'",
            rest[close + 1..].trim()
        )));
    }

    let mut args: Vec<&str> = split_top_level(&rest[..close], ',')
        .into_iter()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();

    let argument = if function.takes_extra_arg() {
        let raw = args
            .pop()
            .ok_or_else(|| QueryError::Expression(format!("{} requires an argument", name)))?;
        Some(parse_argument(function, raw)?)
    } else {
        None
    };

    if args.is_empty() {
        return Err(QueryError::Expression(format!(
            "{} requires at least one metric",
            name
        )));
    }
    if args.len() > function.max_metrics() {
        return Err(QueryError::Expression(format!(
            "{} accepts at most {} metrics, got {}",
            name,
            function.max_metrics(),
            args.len()
        )));
    }

    Ok(Expression {
        text: text.to_string(),
        function,
        metrics: args.into_iter().map(str::to_string).collect(),
        argument,
    })
}

/// Byte offset of the `)` closing the argument list
fn closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '{' | '(' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn parse_argument(function: ExprFunction, raw: &str) -> QueryResult<ExprArgument> {
    let invalid = || QueryError::Expression(format!("Invalid argument '{}'", raw));

    match function {
        ExprFunction::Scale => raw.parse().map(ExprArgument::Factor).map_err(|_| invalid()),
        ExprFunction::HighestMax | ExprFunction::HighestCurrent => match raw.parse::<usize>() {
            Ok(n) if n > 0 => Ok(ExprArgument::Count(n)),
            _ => Err(invalid()),
        },
        ExprFunction::MovingAverage => {
            let unquoted = raw.trim_matches(|c| c == '\'' || c == '"');
            if let Ok(n) = unquoted.parse::<usize>() {
                return if n > 0 {
                    Ok(ExprArgument::Window(Window::Points(n)))
                } else {
                    Err(invalid())
                };
            }
            let split = unquoted
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(invalid)?;
            let amount: i64 = unquoted[..split].parse().map_err(|_| invalid())?;
            let unit = match &unquoted[split..] {
                "s" => 1,
                "m" => 60,
                "h" => 3600,
                "d" => 86_400,
                "w" => 7 * 86_400,
                "n" => 30 * 86_400,
                "y" => 365 * 86_400,
                _ => return Err(invalid()),
            };
            Ok(ExprArgument::Window(Window::Span(amount * unit)))
        }
        _ => Err(invalid()),
    }
}

/// Apply an expression to the results of its metric queries
///
/// `results[i]` holds the series produced by `expr.metrics[i]`.
pub fn evaluate(
    expr: &Expression,
    results: Vec<Vec<CombinedSeries>>,
    ms_resolution: bool,
    arrays: bool,
) -> Vec<CombinedSeries> {
    let mut inputs = results.into_iter();
    let primary = if expr.function.max_metrics() == 1 {
        inputs.next().unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut out = match (expr.function, expr.argument) {
        (ExprFunction::Absolute, _) => map_values(primary, f64::abs),
        (ExprFunction::Scale, Some(ExprArgument::Factor(factor))) => {
            map_values(primary, |v| v * factor)
        }
        (ExprFunction::MovingAverage, Some(ExprArgument::Window(window))) => {
            let window = match window {
                Window::Span(seconds) if ms_resolution => Window::Span(seconds * 1000),
                other => other,
            };
            primary
                .into_iter()
                .map(|mut s| {
                    s.dps.samples = moving_average(&s.dps.samples, window);
                    s
                })
                .collect()
        }
        (ExprFunction::HighestMax, Some(ExprArgument::Count(n))) => {
            highest(primary, n, |dps| {
                dps.iter().filter_map(|s| s.value).reduce(f64::max)
            })
        }
        (ExprFunction::HighestCurrent, Some(ExprArgument::Count(n))) => {
            highest(primary, n, Dps::last_value)
        }
        (ExprFunction::SumSeries, _) => union(inputs.collect(), |values| {
            values.iter().map(|v| v.unwrap_or(0.0)).sum()
        }),
        (ExprFunction::DiffSeries, _) => union(inputs.collect(), |values| {
            let head = values.first().copied().flatten().unwrap_or(0.0);
            head - values.iter().skip(1).map(|v| v.unwrap_or(0.0)).sum::<f64>()
        }),
        (ExprFunction::MultiplySeries, _) => union(inputs.collect(), |values| {
            values.iter().map(|v| v.unwrap_or(0.0)).product()
        }),
        (ExprFunction::DivideSeries, _) => {
            tracing::warn!("divideSeries is not implemented, returning no series");
            Vec::new()
        }
        (function, argument) => {
            tracing::warn!("{:?} called with unexpected argument {:?}", function, argument);
            Vec::new()
        }
    };

    for series in &mut out {
        series.metric = expr.text.clone();
        series.dps.arrays = arrays;
    }
    out
}

fn map_values(series: Vec<CombinedSeries>, f: impl Fn(f64) -> f64) -> Vec<CombinedSeries> {
    series
        .into_iter()
        .map(|mut s| {
            for sample in &mut s.dps.samples {
                sample.value = sample.value.map(&f);
            }
            s
        })
        .collect()
}

/// Trailing mean over the original values; NaN points count like nulls
fn moving_average(samples: &[Sample], window: Window) -> Vec<Sample> {
    let mut out = Vec::with_capacity(samples.len());
    let mut start = 0;
    let mut sum = 0.0;
    let mut count = 0usize;

    for (i, sample) in samples.iter().enumerate() {
        if let Some(v) = sample.value.filter(|v| !v.is_nan()) {
            sum += v;
            count += 1;
        }

        loop {
            let expired = match window {
                Window::Points(n) => i - start >= n,
                Window::Span(span) => sample.timestamp - samples[start].timestamp >= span,
            };
            if !expired || start >= i {
                break;
            }
            if let Some(v) = samples[start].value.filter(|v| !v.is_nan()) {
                sum -= v;
                count -= 1;
            }
            start += 1;
        }

        out.push(Sample {
            timestamp: sample.timestamp,
            value: sample.value.map(|v| {
                if v.is_nan() || count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            }),
        });
    }

    out
}

/// Keep the `n` series ranking highest by `rank`; ties at the cutoff are
/// trimmed from the end until at most `n` remain
fn highest(
    series: Vec<CombinedSeries>,
    n: usize,
    rank: impl Fn(&Dps) -> Option<f64>,
) -> Vec<CombinedSeries> {
    if series.is_empty() {
        return series;
    }

    let scores: Vec<f64> = series
        .iter()
        .map(|s| {
            rank(&s.dps)
                .filter(|v| !v.is_nan())
                .unwrap_or(f64::NEG_INFINITY)
        })
        .collect();

    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let limit = sorted[n.min(sorted.len()) - 1];

    let mut keep: Vec<bool> = scores.iter().map(|s| *s >= limit).collect();
    let mut kept = keep.iter().filter(|k| **k).count();
    for i in (0..scores.len()).rev() {
        if kept <= n {
            break;
        }
        if keep[i] && scores[i] == limit {
            keep[i] = false;
            kept -= 1;
        }
    }

    series
        .into_iter()
        .zip(keep)
        .filter_map(|(s, k)| k.then_some(s))
        .collect()
}

/// Union the query results by tag set and reduce each timestamp with `reduce`
///
/// `reduce` receives one entry per member series of a tag set, `None` where
/// that series has no value at the timestamp.
fn union(
    results: Vec<Vec<CombinedSeries>>,
    reduce: impl Fn(&[Option<f64>]) -> f64,
) -> Vec<CombinedSeries> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<CombinedSeries>> = HashMap::new();

    for series in results.into_iter().flatten() {
        let key = canonical_key(&series.tags);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(series);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let Some(members) = groups.remove(&key) else {
            continue;
        };

        let lookups: Vec<HashMap<i64, f64>> = members
            .iter()
            .map(|s| {
                s.dps
                    .iter()
                    .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
                    .collect()
            })
            .collect();
        let timestamps: BTreeSet<i64> = members
            .iter()
            .flat_map(|s| s.dps.iter().map(|p| p.timestamp))
            .collect();

        let mut values = Vec::with_capacity(members.len());
        let samples = timestamps
            .into_iter()
            .map(|t| {
                values.clear();
                values.extend(lookups.iter().map(|l| l.get(&t).copied()));
                Sample::new(t, reduce(&values))
            })
            .collect();

        let mut combined = members.into_iter().next().unwrap_or_else(|| {
            CombinedSeries::new(String::new(), Default::default(), Vec::new(), Dps::default())
        });
        combined.dps.samples = samples;
        out.push(combined);
    }

    out
}
