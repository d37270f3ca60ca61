//! Time expressions
//!
//! Accepted forms for `start` and `end`:
//!
//! - `now`
//! - relative: `<N><unit>-ago` with unit `ms`, `s`, `m`, `h`, `d`, `w`, `n` (30 days), `y` (365 days)
//! - absolute: `YYYY/MM/DD-HH:mm:ss`, `YYYY/MM/DD HH:mm:ss`, `YYYY/MM/DD-HH:mm`, `YYYY/MM/DD` (UTC)
//! - epoch: up to 10 digits are seconds, anything longer is milliseconds

use chrono::{NaiveDate, NaiveDateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res, value},
    sequence::{terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::query::error::{QueryError, QueryResult};

const SECOND_MS: i64 = 1000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// A query window in milliseconds, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Resolve request parameters into a range; a missing end means now
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> QueryResult<Self> {
        Self::resolve_at(start, end, Utc::now().timestamp_millis())
    }

    /// [`TimeRange::resolve`] against an explicit clock
    pub fn resolve_at(start: Option<&str>, end: Option<&str>, now_ms: i64) -> QueryResult<Self> {
        let start = start
            .filter(|s| !s.trim().is_empty())
            .ok_or(QueryError::MissingStart)?;
        let start = parse_time(start, now_ms)?;
        let end = match end.filter(|s| !s.trim().is_empty()) {
            Some(end) => parse_time(end, now_ms)?,
            None => now_ms,
        };
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Range bounds in seconds
    pub fn as_seconds(&self) -> (i64, i64) {
        (self.start.div_euclid(SECOND_MS), self.end.div_euclid(SECOND_MS))
    }
}

/// Parse a single time expression into epoch milliseconds
pub fn parse_time(input: &str, now_ms: i64) -> QueryResult<i64> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("now") {
        return Ok(now_ms);
    }

    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        let n: i64 = input
            .parse()
            .map_err(|_| QueryError::InvalidTime(input.to_string()))?;
        return Ok(if input.len() <= 10 { n * SECOND_MS } else { n });
    }

    if let Ok((_, offset)) = all_consuming(relative)(input) {
        return Ok(now_ms - offset);
    }

    parse_absolute(input).ok_or_else(|| QueryError::InvalidTime(input.to_string()))
}

/// Duration of one relative-time unit in milliseconds
fn unit(input: &str) -> IResult<&str, i64> {
    alt((
        value(1, tag("ms")),
        value(SECOND_MS, tag("s")),
        value(MINUTE_MS, tag("m")),
        value(HOUR_MS, tag("h")),
        value(DAY_MS, tag("d")),
        value(7 * DAY_MS, tag("w")),
        value(30 * DAY_MS, tag("n")),
        value(365 * DAY_MS, tag("y")),
    ))(input)
}

/// `<N><unit>-ago` as a millisecond offset
fn relative(input: &str) -> IResult<&str, i64> {
    let (input, (count, unit_ms)) = terminated(
        tuple((map_res(digit1, |s: &str| s.parse::<i64>()), unit)),
        tag("-ago"),
    )(input)?;
    Ok((input, count.saturating_mul(unit_ms)))
}

fn parse_absolute(input: &str) -> Option<i64> {
    const FORMATS: [&str; 3] = ["%Y/%m/%d-%H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y/%m/%d-%H:%M"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y/%m/%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp_millis())
}
