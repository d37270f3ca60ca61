//! Downsampling
//!
//! Reduces one series to fixed-width buckets `[t, t + width)` starting at the
//! first bucket boundary at or after the range start and ending with the
//! bucket that starts at or before the range end. Empty buckets follow the
//! [`FillPolicy`].

use crate::backend::RawPoint;
use crate::query::ast::{DownsampleSpec, FillPolicy};
use crate::query::error::{QueryError, QueryResult};
use crate::query::series::Sample;
use crate::query::time::TimeRange;

/// Most buckets a filled downsample may emit per series
pub const MAX_FILL_BUCKETS: i64 = 1_000_000;

/// Reject a filled downsample whose bucket walk over `range` exceeds
/// [`MAX_FILL_BUCKETS`]; `none` fill only emits buckets that hold points
pub fn check_bucket_count(range: TimeRange, spec: &DownsampleSpec) -> QueryResult<()> {
    if spec.fill == FillPolicy::None || spec.interval_ms <= 0 {
        return Ok(());
    }

    let buckets = range.end.saturating_sub(range.start) / spec.interval_ms + 1;
    if buckets > MAX_FILL_BUCKETS {
        return Err(QueryError::InvalidDownsample(format!(
            "'{}' needs {} buckets over the query range (limit {})",
            spec.raw, buckets, MAX_FILL_BUCKETS
        )));
    }
    Ok(())
}

/// Downsample `points` (sorted ascending) over `range`
pub fn downsample(points: &[RawPoint], range: TimeRange, spec: &DownsampleSpec) -> Vec<Sample> {
    let width = spec.interval_ms;
    if width <= 0 {
        return passthrough(points);
    }

    let mut out = Vec::new();
    let mut cursor = 0;
    let mut bucket = spec.align_up(range.start);
    let mut values = Vec::new();

    while bucket <= range.end {
        let bucket_end = bucket.saturating_add(width);

        while cursor < points.len() && points[cursor].timestamp < bucket {
            cursor += 1;
        }

        values.clear();
        while cursor < points.len() && points[cursor].timestamp < bucket_end {
            values.push(points[cursor].value);
            cursor += 1;
        }

        if let Some(value) = spec.function.apply(&values) {
            out.push(Sample::new(bucket, value));
        } else {
            match spec.fill {
                FillPolicy::None => {
                    // skip straight to the bucket holding the next point
                    match points.get(cursor) {
                        Some(next) if next.timestamp > bucket_end => {
                            bucket = spec.align(next.timestamp);
                            continue;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                FillPolicy::Nan => out.push(Sample::new(bucket, f64::NAN)),
                FillPolicy::Null => out.push(Sample::null(bucket)),
                FillPolicy::Zero => out.push(Sample::new(bucket, 0.0)),
            }
        }

        bucket = bucket_end;
    }

    out
}

/// Points unchanged, as samples
pub fn passthrough(points: &[RawPoint]) -> Vec<Sample> {
    points
        .iter()
        .map(|p| Sample::new(p.timestamp, p.value))
        .collect()
}
