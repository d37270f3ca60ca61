//! Tag-set grouping
//!
//! Splits filtered series into output groups keyed by the values of the
//! group-by tag keys.

use std::collections::{BTreeSet, HashSet};

use crate::backend::RawSeries;
use crate::query::ast::{Filter, TagSet};

/// Unique group-by tag combinations, in order of first appearance
///
/// Returns exactly one empty tag set when nothing is grouped.
pub fn unique_tag_sets(series: &[RawSeries], filters: &[Filter]) -> Vec<TagSet> {
    let keys: HashSet<&str> = filters
        .iter()
        .filter(|f| f.group_by)
        .map(|f| f.tagk.as_str())
        .collect();

    let mut seen = HashSet::new();
    let mut sets = Vec::new();

    for s in series {
        let set: TagSet = s
            .tags
            .iter()
            .filter(|(k, _)| keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if seen.insert(canonical_key(&set)) {
            sets.push(set);
        }
    }

    if sets.is_empty() {
        sets.push(TagSet::new());
    }
    sets
}

/// Sorted `k:v` serialisation identifying a tag set
pub fn canonical_key(set: &TagSet) -> String {
    set.iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Series carrying every key/value of `set`; extra tags are allowed
pub fn series_for_tag_set<'a>(series: &'a [RawSeries], set: &TagSet) -> Vec<&'a RawSeries> {
    series
        .iter()
        .filter(|s| set.iter().all(|(k, v)| s.tags.get(k) == Some(v)))
        .collect()
}

/// Sorted tag keys on participating series that the tag set does not pin
pub fn aggregated_tags(series: &[&RawSeries], set: &TagSet) -> Vec<String> {
    series
        .iter()
        .flat_map(|s| s.tags.keys())
        .filter(|k| !set.contains_key(*k))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<RawSeries> {
        vec![
            RawSeries::new("cpu", "01").tag("host", "a").tag("dc", "lga"),
            RawSeries::new("cpu", "02").tag("host", "b").tag("dc", "lga"),
            RawSeries::new("cpu", "03").tag("host", "a").tag("dc", "sjc"),
        ]
    }

    #[test]
    fn test_no_group_by_filters_yields_single_empty_set() {
        assert_eq!(unique_tag_sets(&sample(), &[]), vec![TagSet::new()]);
        assert_eq!(unique_tag_sets(&[], &[]), vec![TagSet::new()]);

        let non_grouping = Filter::new("host", crate::query::ast::FilterKind::Wildcard, "*", false);
        assert_eq!(unique_tag_sets(&sample(), &[non_grouping]), vec![TagSet::new()]);
    }

    #[test]
    fn test_unique_sets_in_first_appearance_order() {
        let sets = unique_tag_sets(&sample(), &[Filter::wildcard("host", "*")]);
        let hosts: Vec<&str> = sets.iter().map(|s| s["host"].as_str()).collect();
        assert_eq!(hosts, vec!["a", "b"]);

        let sets = unique_tag_sets(
            &sample(),
            &[Filter::wildcard("host", "*"), Filter::wildcard("dc", "*")],
        );
        assert_eq!(sets.len(), 3);
        assert!(sets.iter().all(|s| s.len() == 2));
    }

    #[test]
    fn test_empty_tag_set_selects_everything() {
        let series = sample();
        let selected = series_for_tag_set(&series, &TagSet::new());
        let expected: Vec<&RawSeries> = series.iter().collect();
        assert_eq!(selected, expected);
    }

    #[test]
    fn test_subset_match() {
        let series = sample();
        let mut set = TagSet::new();
        set.insert("host".to_string(), "a".to_string());
        let selected = series_for_tag_set(&series, &set);
        let ids: Vec<&str> = selected.iter().map(|s| s.tsuid.as_str()).collect();
        assert_eq!(ids, vec!["01", "03"]);

        assert_eq!(aggregated_tags(&selected, &set), vec!["dc".to_string()]);
        assert_eq!(
            aggregated_tags(&selected, &TagSet::new()),
            vec!["dc".to_string(), "host".to_string()]
        );
    }

    #[test]
    fn test_canonical_key_is_order_independent() {
        let mut a = TagSet::new();
        a.insert("host".into(), "x".into());
        a.insert("dc".into(), "y".into());
        assert_eq!(canonical_key(&a), "dc:y,host:x");
    }
}
