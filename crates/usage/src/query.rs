//! Ranked read views over an aggregation result.
//!
//! All queries are pure reads; they never trigger recomputation.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::aggregate::{MaterialUsageStats, UsageSnapshot};
use crate::record::normalize_name;

/// Usage ranking order: usage count descending, then last used descending
/// (absent last-used sorts as oldest).
pub fn usage_ranking(a: &MaterialUsageStats, b: &MaterialUsageStats) -> Ordering {
    b.usage_count
        .cmp(&a.usage_count)
        .then_with(|| b.last_used.cmp(&a.last_used))
}

fn ranked<'a>(
    materials: impl Iterator<Item = &'a MaterialUsageStats>,
    limit: usize,
) -> Vec<&'a MaterialUsageStats> {
    let mut out: Vec<&MaterialUsageStats> = materials.collect();
    out.sort_by(|a, b| usage_ranking(a, b).then_with(|| a.key.cmp(&b.key)));
    out.truncate(limit);
    out
}

/// The `limit` most used materials.
pub fn top_materials(materials: &[MaterialUsageStats], limit: usize) -> Vec<&MaterialUsageStats> {
    ranked(materials.iter(), limit)
}

/// Materials used in at least one category whose label contains `category`
/// (case-insensitive, not trimmed). A blank query matches nothing.
pub fn materials_for_category<'a>(
    materials: &'a [MaterialUsageStats],
    category: &str,
    limit: usize,
) -> Vec<&'a MaterialUsageStats> {
    if category.trim().is_empty() {
        return Vec::new();
    }
    let needle = category.to_lowercase();

    ranked(
        materials.iter().filter(|m| {
            m.categories
                .keys()
                .any(|label| label.to_lowercase().contains(&needle))
        }),
        limit,
    )
}

/// Materials most often used in the same record as `material`.
///
/// Partners are ordered by pairwise count descending, then key ascending.
pub fn commonly_used_with<'a>(
    snapshot: &'a UsageSnapshot,
    material: &str,
    limit: usize,
) -> Vec<&'a MaterialUsageStats> {
    let key = normalize_name(material);
    let Some(partners) = snapshot.co_occurrence.partners(&key) else {
        return Vec::new();
    };

    let mut pairs: Vec<(&String, u64)> = partners.iter().map(|(k, n)| (k, *n)).collect();
    pairs.sort_by(|(ka, na), (kb, nb)| nb.cmp(na).then_with(|| ka.cmp(kb)));

    let by_key: HashMap<&str, &MaterialUsageStats> = snapshot
        .materials
        .iter()
        .map(|m| (m.key.as_str(), m))
        .collect();

    pairs
        .into_iter()
        .filter_map(|(k, _)| by_key.get(k.as_str()).copied())
        .take(limit)
        .collect()
}

impl UsageSnapshot {
    pub fn top_materials(&self, limit: usize) -> Vec<&MaterialUsageStats> {
        top_materials(&self.materials, limit)
    }

    pub fn materials_for_category(&self, category: &str, limit: usize) -> Vec<&MaterialUsageStats> {
        materials_for_category(&self.materials, category, limit)
    }

    pub fn commonly_used_with(&self, material: &str, limit: usize) -> Vec<&MaterialUsageStats> {
        commonly_used_with(self, material, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CoOccurrenceTable;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn test_date(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
    }

    fn test_stats(name: &str, count: u64, last: Option<DateTime<Utc>>) -> MaterialUsageStats {
        MaterialUsageStats {
            key: normalize_name(name),
            display_name: name.to_string(),
            usage_count: count,
            average_quantity: Some(1.0),
            average_unit_cost: Some(1.0),
            last_used: last,
            categories: BTreeMap::new(),
            most_common_unit: None,
        }
    }

    fn with_categories(mut stats: MaterialUsageStats, categories: &[(&str, u64)]) -> MaterialUsageStats {
        stats.categories = categories.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        stats
    }

    fn names(list: &[&MaterialUsageStats]) -> Vec<String> {
        list.iter().map(|m| m.display_name.clone()).collect()
    }

    #[test]
    fn top_n_breaks_count_ties_by_recency() {
        let materials = vec![
            test_stats("Paint", 5, Some(test_date(1, 1))),
            test_stats("Tape", 5, Some(test_date(2, 1))),
            test_stats("Nails", 3, None),
        ];

        assert_eq!(names(&top_materials(&materials, 2)), vec!["Tape", "Paint"]);
        assert_eq!(names(&top_materials(&materials, 10)), vec!["Tape", "Paint", "Nails"]);
        assert!(top_materials(&materials, 0).is_empty());
    }

    #[test]
    fn absent_last_used_ranks_as_oldest() {
        let materials = vec![
            test_stats("Never", 2, None),
            test_stats("Once", 2, Some(test_date(1, 1))),
        ];
        assert_eq!(names(&top_materials(&materials, 2)), vec!["Once", "Never"]);
    }

    #[test]
    fn category_query_is_case_insensitive_substring() {
        let materials = vec![
            with_categories(test_stats("Cabinet Hinge", 4, None), &[("Kitchen Remodel", 3), ("Bath", 1)]),
            with_categories(test_stats("Lag Bolt", 9, None), &[("Deck", 9)]),
        ];

        assert_eq!(names(&materials_for_category(&materials, "kitchen", 5)), vec!["Cabinet Hinge"]);
        assert_eq!(names(&materials_for_category(&materials, "REMODEL", 5)), vec!["Cabinet Hinge"]);
        assert!(materials_for_category(&materials, "garage", 5).is_empty());
        assert!(materials_for_category(&materials, "  ", 5).is_empty());
    }

    #[test]
    fn category_query_keeps_surrounding_whitespace() {
        let materials = vec![with_categories(
            test_stats("Cabinet Hinge", 4, None),
            &[("Kitchen Remodel", 3)],
        )];

        assert!(materials_for_category(&materials, "remodel ", 5).is_empty());
        assert_eq!(names(&materials_for_category(&materials, "kitchen remodel", 5)), vec!["Cabinet Hinge"]);
        assert_eq!(names(&materials_for_category(&materials, " remodel", 5)), vec!["Cabinet Hinge"]);
    }

    #[test]
    fn category_query_uses_usage_ranking() {
        let materials = vec![
            with_categories(test_stats("Grout", 1, None), &[("Bath", 1)]),
            with_categories(test_stats("Tile", 6, None), &[("Master Bath", 6)]),
        ];
        assert_eq!(names(&materials_for_category(&materials, "bath", 5)), vec!["Tile", "Grout"]);
        assert_eq!(names(&materials_for_category(&materials, "bath", 1)), vec!["Tile"]);
    }

    fn test_snapshot() -> UsageSnapshot {
        let mut table = CoOccurrenceTable::new();
        table.add_pair("paint", "tape", 4);
        table.add_pair("paint", "brush", 4);
        table.add_pair("paint", "roller", 7);
        table.add_pair("paint", "ghost", 9);

        UsageSnapshot {
            materials: vec![
                test_stats("Paint", 10, None),
                test_stats("Tape", 4, None),
                test_stats("Brush", 4, None),
                test_stats("Roller", 7, None),
            ],
            co_occurrence: table,
        }
    }

    #[test]
    fn co_used_ties_break_by_key() {
        let snapshot = test_snapshot();
        assert_eq!(names(&snapshot.commonly_used_with("Paint", 1)), vec!["Roller"]);
        assert_eq!(
            names(&snapshot.commonly_used_with("  PAINT ", 3)),
            vec!["Roller", "Brush", "Tape"]
        );
    }

    #[test]
    fn co_used_tie_on_count_prefers_smaller_key() {
        let mut table = CoOccurrenceTable::new();
        table.add_pair("paint", "tape", 4);
        table.add_pair("paint", "brush", 4);
        let snapshot = UsageSnapshot {
            materials: vec![
                test_stats("Paint", 2, None),
                test_stats("Tape", 1, None),
                test_stats("Brush", 1, None),
            ],
            co_occurrence: table,
        };
        assert_eq!(names(&snapshot.commonly_used_with("paint", 1)), vec!["Brush"]);
    }

    #[test]
    fn co_used_skips_partners_without_stats() {
        let snapshot = test_snapshot();
        let all = snapshot.commonly_used_with("paint", 10);
        assert!(all.iter().all(|m| m.key != "ghost"));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn co_used_unknown_material_is_empty() {
        assert!(test_snapshot().commonly_used_with("plywood", 5).is_empty());
    }
}
