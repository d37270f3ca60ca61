//! Tag-value filtering
//!
//! Filters are applied after the backend fetch and are conjunctive: a series
//! survives only if it carries every filtered tag key and each value passes
//! its filter. Each filter is compiled once into a [`TagPredicate`].

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::backend::RawSeries;
use crate::query::ast::{Filter, FilterKind};

/// Compiled form of a [`Filter`]
#[derive(Debug, Clone)]
pub enum TagPredicate {
    /// `*` wildcard or `.*` regexp
    Any,
    /// Membership test, optionally case-folded and negated
    Literal {
        values: HashSet<String>,
        ignore_case: bool,
        negate: bool,
    },
    Pattern(Regex),
    /// Pattern that failed to compile
    Never,
}

impl TagPredicate {
    pub fn compile(filter: &Filter) -> Self {
        match filter.kind {
            FilterKind::LiteralOr
            | FilterKind::ILiteralOr
            | FilterKind::NotLiteralOr
            | FilterKind::NotILiteralOr => {
                let ignore_case = filter.kind.ignores_case();
                let values = filter
                    .values()
                    .map(|v| if ignore_case { v.to_lowercase() } else { v.to_string() })
                    .collect();
                Self::Literal {
                    values,
                    ignore_case,
                    negate: matches!(
                        filter.kind,
                        FilterKind::NotLiteralOr | FilterKind::NotILiteralOr
                    ),
                }
            }
            FilterKind::Wildcard | FilterKind::IWildcard if filter.filter == "*" => Self::Any,
            FilterKind::Regexp if filter.filter == ".*" => Self::Any,
            FilterKind::Wildcard | FilterKind::IWildcard => {
                Self::pattern(&glob_to_regex(&filter.filter), filter.kind.ignores_case())
            }
            FilterKind::Regexp => Self::pattern(&filter.filter, false),
        }
    }

    fn pattern(pattern: &str, ignore_case: bool) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(ignore_case).build() {
            Ok(re) => Self::Pattern(re),
            Err(e) => {
                tracing::warn!("regexp({}) caused an error: {}", pattern, e);
                Self::Never
            }
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Literal {
                values,
                ignore_case,
                negate,
            } => {
                let found = if *ignore_case {
                    values.contains(&value.to_lowercase())
                } else {
                    values.contains(value)
                };
                found != *negate
            }
            Self::Pattern(re) => re.is_match(value),
            Self::Never => false,
        }
    }
}

/// Anchored regular expression for a `*` glob
fn glob_to_regex(glob: &str) -> String {
    let body: Vec<String> = glob.split('*').map(regex::escape).collect();
    format!("^{}$", body.join(".*"))
}

/// Keep the series that satisfy every filter, preserving input order
pub fn apply_filters(series: Vec<RawSeries>, filters: &[Filter]) -> Vec<RawSeries> {
    if filters.is_empty() {
        return series;
    }

    let compiled: Vec<(&str, TagPredicate)> = filters
        .iter()
        .map(|f| (f.tagk.as_str(), TagPredicate::compile(f)))
        .collect();

    series
        .into_iter()
        .filter(|s| {
            compiled.iter().all(|(tagk, predicate)| {
                s.tags
                    .get(*tagk)
                    .map(|value| predicate.matches(value))
                    .unwrap_or(false)
            })
        })
        .collect()
}
