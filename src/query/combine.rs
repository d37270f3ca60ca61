//! Series combination
//!
//! Merges the (already downsampled) series of one tag set into a single
//! output series:
//!
//! 1. walk the sorted union of every input timestamp
//! 2. take each series' value at `t`, or interpolate linearly between its
//!    neighbours when it has points on both sides of `t`
//! 3. reduce the collected values with the cross-series aggregator
//! 4. optionally convert to a per-second rate
//! 5. convert timestamps to seconds unless millisecond resolution was asked for

use std::collections::BTreeSet;

use crate::query::ast::{Aggregator, RateOptions, TagSet};
use crate::query::series::{CombinedSeries, Dps, Sample};

/// One participating series after downsampling
#[derive(Debug, Clone, PartialEq)]
pub struct SampledSeries {
    pub tsuid: String,
    pub samples: Vec<Sample>,
}

/// Everything about the output series that is not data
#[derive(Debug, Clone)]
pub struct CombineContext {
    pub metric: String,
    pub tag_set: TagSet,
    pub aggregated_tags: Vec<String>,
    pub aggregator: Aggregator,
    /// Rate conversion, `Some(RateOptions::default())` for a plain `rate`
    pub rate: Option<RateOptions>,
    pub ms_resolution: bool,
    pub arrays: bool,
    pub show_tsuids: bool,
}

/// Combine the series of one tag set
///
/// Series without points are dropped before combination but their tsuids are
/// still reported.
pub fn combine(series: Vec<SampledSeries>, ctx: CombineContext) -> CombinedSeries {
    let tsuids = ctx
        .show_tsuids
        .then(|| series.iter().map(|s| s.tsuid.clone()).collect::<Vec<_>>());

    let inputs: Vec<Vec<Sample>> = series
        .into_iter()
        .map(|s| s.samples)
        .filter(|s| !s.is_empty())
        .collect();

    let mut samples = aggregate(&inputs, ctx.aggregator);

    if let Some(options) = ctx.rate {
        samples = to_rate(&samples, &options);
    }

    if !ctx.ms_resolution {
        for sample in &mut samples {
            sample.timestamp = (sample.timestamp as f64 / 1000.0).round() as i64;
        }
    }

    let mut out = CombinedSeries::new(
        ctx.metric,
        ctx.tag_set,
        ctx.aggregated_tags,
        Dps::new(samples, ctx.arrays),
    );
    out.tsuids = tsuids;
    out
}

/// Align, interpolate and reduce the inputs onto the union of their timestamps
fn aggregate(inputs: &[Vec<Sample>], aggregator: Aggregator) -> Vec<Sample> {
    let timestamps: BTreeSet<i64> = inputs
        .iter()
        .flat_map(|s| s.iter().map(|p| p.timestamp))
        .collect();

    let mut cursors = vec![0usize; inputs.len()];
    let mut values = Vec::with_capacity(inputs.len());
    let mut out = Vec::with_capacity(timestamps.len());

    for t in timestamps {
        values.clear();
        let mut saw_null = false;

        for (points, cursor) in inputs.iter().zip(cursors.iter_mut()) {
            while *cursor < points.len() && points[*cursor].timestamp < t {
                *cursor += 1;
            }

            match points.get(*cursor) {
                Some(p) if p.timestamp == t => match p.value {
                    Some(v) => values.push(v),
                    None => saw_null = true,
                },
                Some(next) if *cursor > 0 => {
                    let prev = points[*cursor - 1];
                    if let (Some(pv), Some(nv)) = (prev.value, next.value) {
                        let ratio =
                            (t - prev.timestamp) as f64 / (next.timestamp - prev.timestamp) as f64;
                        values.push(pv + ratio * (nv - pv));
                    }
                }
                _ => {}
            }
        }

        if values.is_empty() {
            if saw_null {
                out.push(Sample::null(t));
            }
            continue;
        }

        let combined = match aggregator {
            Aggregator::Avg => values.iter().sum::<f64>() / inputs.len() as f64,
            other => match other.apply(&values) {
                Some(v) => v,
                None => continue,
            },
        };
        out.push(Sample::new(t, combined));
    }

    out
}

/// Per-second rate between consecutive samples; the first sample is dropped
fn to_rate(samples: &[Sample], options: &RateOptions) -> Vec<Sample> {
    samples
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (pair[0], pair[1]);
            let value = match (prev.value, cur.value) {
                (Some(pv), Some(cv)) => {
                    let mut delta = cv - pv;
                    if options.counter && delta < 0.0 {
                        let max = options.counter_max.unwrap_or(i64::MAX) as f64;
                        delta = max - pv + cv;
                    }
                    let seconds = (cur.timestamp - prev.timestamp) as f64 / 1000.0;
                    let rate = delta / seconds;
                    match options.reset_value {
                        Some(reset) if reset > 0 && rate > reset as f64 => Some(0.0),
                        _ => Some(rate),
                    }
                }
                _ => None,
            };
            Sample {
                timestamp: cur.timestamp,
                value,
            }
        })
        .collect()
}
