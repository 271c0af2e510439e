//! Aggregation pass: records → per-material statistics + co-occurrence table.
//!
//! Model:
//! - Every material occurrence folds into a [`MaterialAccumulator`] keyed by
//!   its normalized name.
//! - Every record adds one to each unordered pair of the distinct materials it
//!   contains, in both directions.
//! - Accumulators combine with an associative, commutative `merge`, so any
//!   partition of the input folds to the same result.
//!
//! Tie-breaks that depend on "first seen" use the occurrence position in the
//! concatenated input (work orders, then billing documents), which keeps them
//! independent of fold order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::usage_ranking;
use crate::record::{normalize_name, sanitize, MaterialRecord, SourceRecord};

/// Position of a material occurrence in a pass: (record index, line index).
pub type Ordinal = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq)]
struct UnitTally {
    count: u64,
    first_seen: Ordinal,
}

/// Running totals for one material during a single pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAccumulator {
    display_name: String,
    first_seen: Ordinal,
    usage_count: u64,
    quantity_sum: f64,
    unit_cost_sum: f64,
    last_used: Option<DateTime<Utc>>,
    categories: BTreeMap<String, u64>,
    units: BTreeMap<String, UnitTally>,
}

impl MaterialAccumulator {
    /// Accumulator holding a single occurrence.
    pub fn observe(
        at: Ordinal,
        material: &MaterialRecord,
        category: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let mut acc = Self {
            display_name: material.name.trim().to_string(),
            first_seen: at,
            usage_count: 0,
            quantity_sum: 0.0,
            unit_cost_sum: 0.0,
            last_used: None,
            categories: BTreeMap::new(),
            units: BTreeMap::new(),
        };
        acc.record(at, material, category, timestamp);
        acc
    }

    /// Fold one more occurrence into the running totals.
    pub fn record(
        &mut self,
        at: Ordinal,
        material: &MaterialRecord,
        category: &str,
        timestamp: Option<DateTime<Utc>>,
    ) {
        if at < self.first_seen {
            self.first_seen = at;
            self.display_name = material.name.trim().to_string();
        }

        self.usage_count += 1;
        self.quantity_sum += sanitize(material.quantity);
        self.unit_cost_sum += sanitize(material.unit_cost);
        // `None < Some(_)`, so an absent timestamp never wins.
        self.last_used = self.last_used.max(timestamp);

        let category = category.trim();
        if !category.is_empty() {
            *self.categories.entry(category.to_string()).or_insert(0) += 1;
        }

        if let Some(unit) = material.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            let tally = self.units.entry(unit.to_string()).or_insert(UnitTally {
                count: 0,
                first_seen: at,
            });
            tally.count += 1;
            tally.first_seen = tally.first_seen.min(at);
        }
    }

    /// Combine two partial accumulators for the same key.
    pub fn merge(&mut self, other: MaterialAccumulator) {
        if other.first_seen < self.first_seen {
            self.first_seen = other.first_seen;
            self.display_name = other.display_name;
        }

        self.usage_count += other.usage_count;
        self.quantity_sum += other.quantity_sum;
        self.unit_cost_sum += other.unit_cost_sum;
        self.last_used = self.last_used.max(other.last_used);

        for (category, n) in other.categories {
            *self.categories.entry(category).or_insert(0) += n;
        }

        for (unit, theirs) in other.units {
            self.units
                .entry(unit)
                .and_modify(|ours| {
                    ours.count += theirs.count;
                    ours.first_seen = ours.first_seen.min(theirs.first_seen);
                })
                .or_insert(theirs);
        }
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// Most frequent unit; equal counts go to the unit seen first in the pass.
    fn most_common_unit(&self) -> Option<String> {
        self.units
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.count
                    .cmp(&b.count)
                    .then_with(|| b.first_seen.cmp(&a.first_seen))
            })
            .map(|(unit, _)| unit.clone())
    }

    /// Turn running totals into immutable output.
    pub fn finalize(self, key: String) -> MaterialUsageStats {
        let most_common_unit = self.most_common_unit();
        let (average_quantity, average_unit_cost) = if self.usage_count == 0 {
            (None, None)
        } else {
            let n = self.usage_count as f64;
            (Some(self.quantity_sum / n), Some(self.unit_cost_sum / n))
        };

        MaterialUsageStats {
            key,
            display_name: self.display_name,
            usage_count: self.usage_count,
            average_quantity,
            average_unit_cost,
            last_used: self.last_used,
            categories: self.categories,
            most_common_unit,
        }
    }
}

/// Usage statistics for one material (output of a pass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialUsageStats {
    /// Normalized name (trimmed, lower-cased).
    pub key: String,
    /// Name as first seen in the pass.
    pub display_name: String,
    pub usage_count: u64,
    pub average_quantity: Option<f64>,
    pub average_unit_cost: Option<f64>,
    pub last_used: Option<DateTime<Utc>>,
    /// Category/title label → number of occurrences.
    pub categories: BTreeMap<String, u64>,
    pub most_common_unit: Option<String>,
}

/// Symmetric pairwise counts of materials appearing in the same record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoOccurrenceTable(BTreeMap<String, BTreeMap<String, u64>>);

impl CoOccurrenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record containing exactly the given distinct keys.
    pub fn record_together(&mut self, keys: &BTreeSet<String>) {
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                self.add_pair(a, b, 1);
            }
        }
    }

    /// Add `n` to both `a → b` and `b → a`. Self-pairs are ignored.
    pub fn add_pair(&mut self, a: &str, b: &str, n: u64) {
        if a == b || n == 0 {
            return;
        }
        *self.0.entry(a.to_string()).or_default().entry(b.to_string()).or_insert(0) += n;
        *self.0.entry(b.to_string()).or_default().entry(a.to_string()).or_insert(0) += n;
    }

    pub fn count(&self, a: &str, b: &str) -> u64 {
        self.0.get(a).and_then(|row| row.get(b)).copied().unwrap_or(0)
    }

    pub fn partners(&self, key: &str) -> Option<&BTreeMap<String, u64>> {
        self.0.get(key)
    }

    pub fn merge(&mut self, other: CoOccurrenceTable) {
        for (a, row) in other.0 {
            let ours = self.0.entry(a).or_default();
            for (b, n) in row {
                *ours.entry(b).or_insert(0) += n;
            }
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.0
            .iter()
            .all(|(a, row)| row.iter().all(|(b, n)| self.count(b, a) == *n))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, BTreeMap<String, u64>>> for CoOccurrenceTable {
    fn from(value: BTreeMap<String, BTreeMap<String, u64>>) -> Self {
        Self(value)
    }
}

/// Complete output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Sorted by usage ranking, then key.
    pub materials: Vec<MaterialUsageStats>,
    pub co_occurrence: CoOccurrenceTable,
}

impl UsageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MaterialUsageStats> {
        self.materials.iter().find(|m| m.key == key)
    }
}

/// Partial aggregation state; fold records in, merge partials, then finish.
#[derive(Debug, Clone, Default)]
pub struct UsageFold {
    accumulators: HashMap<String, MaterialAccumulator>,
    co_occurrence: CoOccurrenceTable,
}

impl UsageFold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record located at `position` in the concatenated input.
    pub fn fold_record(&mut self, position: usize, record: &SourceRecord) {
        let mut keys = BTreeSet::new();

        for (line, material) in record.materials.iter().enumerate() {
            let key = normalize_name(&material.name);
            let at = (position, line);
            match self.accumulators.get_mut(&key) {
                Some(acc) => acc.record(at, material, &record.category, record.timestamp),
                None => {
                    let acc =
                        MaterialAccumulator::observe(at, material, &record.category, record.timestamp);
                    self.accumulators.insert(key.clone(), acc);
                }
            }
            keys.insert(key);
        }

        self.co_occurrence.record_together(&keys);
    }

    pub fn merge(mut self, other: UsageFold) -> UsageFold {
        for (key, acc) in other.accumulators {
            match self.accumulators.get_mut(&key) {
                Some(ours) => ours.merge(acc),
                None => {
                    self.accumulators.insert(key, acc);
                }
            }
        }
        self.co_occurrence.merge(other.co_occurrence);
        self
    }

    pub fn finish(self) -> UsageSnapshot {
        let mut materials: Vec<MaterialUsageStats> = self
            .accumulators
            .into_iter()
            .map(|(key, acc)| acc.finalize(key))
            .collect();

        materials.sort_by(|a, b| usage_ranking(a, b).then_with(|| a.key.cmp(&b.key)));

        UsageSnapshot {
            materials,
            co_occurrence: self.co_occurrence,
        }
    }
}

/// Run a complete aggregation pass.
///
/// Pure: the result depends only on the two inputs.
pub fn aggregate(work_orders: &[SourceRecord], billing_documents: &[SourceRecord]) -> UsageSnapshot {
    let mut fold = UsageFold::new();
    for (position, record) in work_orders.iter().chain(billing_documents).enumerate() {
        fold.fold_record(position, record);
    }
    fold.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use materialflow_core::RecordId;
    use proptest::prelude::*;

    fn test_time(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
    }

    fn test_work_order(
        id: &str,
        category: &str,
        at: Option<DateTime<Utc>>,
        materials: Vec<MaterialRecord>,
    ) -> SourceRecord {
        SourceRecord::work_order(RecordId::new(id).unwrap(), category, at, materials)
    }

    fn test_invoice(id: &str, title: &str, due: DateTime<Utc>, materials: Vec<MaterialRecord>) -> SourceRecord {
        SourceRecord::billing_document(RecordId::new(id).unwrap(), title, due, materials)
    }

    #[test]
    fn aggregates_across_both_collections() {
        let work_orders = vec![
            test_work_order(
                "wo-1",
                "Kitchen Remodel",
                Some(test_time(1, 10)),
                vec![
                    MaterialRecord::new("Paint", 2.0, 30.0).with_unit("gal"),
                    MaterialRecord::new("Tape", 1.0, 5.0),
                ],
            ),
            test_work_order(
                "wo-2",
                "Bath",
                Some(test_time(2, 1)),
                vec![MaterialRecord::new(" paint ", 4.0, 20.0).with_unit("gal")],
            ),
        ];
        let invoices = vec![test_invoice(
            "inv-1",
            "Kitchen Remodel",
            test_time(1, 20),
            vec![MaterialRecord::new("PAINT", 3.0, 25.0).with_unit("qt")],
        )];

        let snapshot = aggregate(&work_orders, &invoices);
        assert_eq!(snapshot.materials.len(), 2);

        let paint = snapshot.get("paint").unwrap();
        assert_eq!(paint.display_name, "Paint");
        assert_eq!(paint.usage_count, 3);
        assert_eq!(paint.average_quantity, Some(3.0));
        assert_eq!(paint.average_unit_cost, Some(25.0));
        assert_eq!(paint.last_used, Some(test_time(2, 1)));
        assert_eq!(paint.categories.get("Kitchen Remodel"), Some(&2));
        assert_eq!(paint.categories.get("Bath"), Some(&1));
        assert_eq!(paint.most_common_unit.as_deref(), Some("gal"));

        let tape = snapshot.get("tape").unwrap();
        assert_eq!(tape.most_common_unit, None);
        assert_eq!(snapshot.materials[0].key, "paint");

        assert_eq!(snapshot.co_occurrence.count("paint", "tape"), 1);
        assert_eq!(snapshot.co_occurrence.count("tape", "paint"), 1);
    }

    #[test]
    fn non_finite_values_contribute_zero() {
        let records = vec![test_work_order(
            "wo-1",
            "Bath",
            None,
            vec![
                MaterialRecord::new("Grout", f64::NAN, 10.0),
                MaterialRecord::new("Grout", 4.0, f64::INFINITY),
            ],
        )];

        let snapshot = aggregate(&records, &[]);
        let grout = snapshot.get("grout").unwrap();
        assert_eq!(grout.usage_count, 2);
        assert_eq!(grout.average_quantity, Some(2.0));
        assert_eq!(grout.average_unit_cost, Some(5.0));
        assert_eq!(grout.last_used, None);
    }

    #[test]
    fn duplicate_material_in_one_record_pairs_once() {
        let records = vec![test_work_order(
            "wo-1",
            "Bath",
            None,
            vec![
                MaterialRecord::new("Grout", 1.0, 1.0),
                MaterialRecord::new("grout", 1.0, 1.0),
                MaterialRecord::new("Tile", 1.0, 1.0),
            ],
        )];

        let snapshot = aggregate(&records, &[]);
        assert_eq!(snapshot.co_occurrence.count("grout", "tile"), 1);
        assert_eq!(snapshot.co_occurrence.count("tile", "grout"), 1);
        assert_eq!(snapshot.co_occurrence.count("grout", "grout"), 0);
        assert_eq!(snapshot.get("grout").unwrap().usage_count, 2);
    }

    #[test]
    fn blank_categories_and_units_are_ignored() {
        let records = vec![test_work_order(
            "wo-1",
            "   ",
            None,
            vec![MaterialRecord::new("Caulk", 1.0, 1.0).with_unit("  ")],
        )];

        let snapshot = aggregate(&records, &[]);
        let caulk = snapshot.get("caulk").unwrap();
        assert!(caulk.categories.is_empty());
        assert_eq!(caulk.most_common_unit, None);
    }

    #[test]
    fn blank_material_name_aggregates_under_empty_key() {
        let records = vec![test_work_order(
            "wo-1",
            "Bath",
            None,
            vec![
                MaterialRecord::new("   ", 2.0, 1.0),
                MaterialRecord::new("Tile", 1.0, 1.0),
            ],
        )];

        let snapshot = aggregate(&records, &[]);
        let keys: BTreeSet<&str> = snapshot.materials.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, BTreeSet::from(["", "tile"]));

        let blank = snapshot.get("").unwrap();
        assert_eq!(blank.usage_count, 1);
        assert_eq!(blank.display_name, "");
        assert_eq!(blank.average_quantity, Some(2.0));
        assert_eq!(snapshot.co_occurrence.count("tile", ""), 1);
        assert!(snapshot.co_occurrence.is_symmetric());
    }

    #[test]
    fn unit_ties_go_to_first_seen_unit() {
        let records = vec![
            test_work_order("wo-1", "A", None, vec![MaterialRecord::new("Wire", 1.0, 1.0).with_unit("m")]),
            test_work_order("wo-2", "A", None, vec![MaterialRecord::new("Wire", 1.0, 1.0).with_unit("ft")]),
        ];
        assert_eq!(
            aggregate(&records, &[]).get("wire").unwrap().most_common_unit.as_deref(),
            Some("m")
        );

        let reversed: Vec<_> = records.iter().rev().cloned().collect();
        assert_eq!(
            aggregate(&reversed, &[]).get("wire").unwrap().most_common_unit.as_deref(),
            Some("ft")
        );
    }

    #[test]
    fn display_name_is_first_seen_casing() {
        let records = vec![
            test_work_order("wo-1", "A", None, vec![MaterialRecord::new("PVC Pipe", 1.0, 1.0)]),
            test_work_order("wo-2", "A", None, vec![MaterialRecord::new("pvc pipe", 1.0, 1.0)]),
        ];
        assert_eq!(aggregate(&records, &[]).get("pvc pipe").unwrap().display_name, "PVC Pipe");
    }

    #[test]
    fn empty_input_yields_empty_snapshot() {
        let snapshot = aggregate(&[], &[]);
        assert!(snapshot.is_empty());
        assert!(snapshot.co_occurrence.is_empty());
    }

    const NAMES: [&str; 7] = ["Paint", " paint", "Tape", "Brush", "NAILS", "Drywall", "  "];

    fn material_strategy() -> impl Strategy<Value = MaterialRecord> {
        let quantity = prop_oneof![
            8 => (0u32..100).prop_map(|q| q as f64),
            1 => Just(f64::NAN),
            1 => Just(f64::INFINITY),
        ];
        (0..NAMES.len(), quantity, 0u32..500, prop::option::of(prop_oneof![Just("gal"), Just("ea")]))
            .prop_map(|(i, q, cost, unit)| {
                let m = MaterialRecord::new(NAMES[i], q, cost as f64);
                match unit {
                    Some(u) => m.with_unit(u),
                    None => m,
                }
            })
    }

    fn records_strategy() -> impl Strategy<Value = Vec<SourceRecord>> {
        prop::collection::vec(
            (
                prop_oneof![Just("Kitchen"), Just("Bath"), Just("")],
                prop::option::of(1u32..28),
                prop::collection::vec(material_strategy(), 0..6),
            ),
            0..12,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (category, day, materials))| {
                    test_work_order(&format!("wo-{i}"), category, day.map(|d| test_time(1, d)), materials)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Keys are unique and equal to the set of normalized input names.
        #[test]
        fn keys_match_normalized_names(records in records_strategy()) {
            let snapshot = aggregate(&records, &[]);

            let keys: Vec<&str> = snapshot.materials.iter().map(|m| m.key.as_str()).collect();
            let unique: BTreeSet<&str> = keys.iter().copied().collect();
            prop_assert_eq!(keys.len(), unique.len());

            let expected: BTreeSet<String> = records
                .iter()
                .flat_map(|r| r.materials.iter().map(|m| normalize_name(&m.name)))
                .collect();
            let actual: BTreeSet<String> = unique.into_iter().map(str::to_string).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn co_occurrence_is_symmetric(records in records_strategy()) {
            prop_assert!(aggregate(&records, &[]).co_occurrence.is_symmetric());
        }

        /// Averages are the mean of sanitized values.
        #[test]
        fn averages_are_means_of_sanitized_values(records in records_strategy()) {
            let snapshot = aggregate(&records, &[]);
            for stats in &snapshot.materials {
                let values: Vec<&MaterialRecord> = records
                    .iter()
                    .flat_map(|r| r.materials.iter())
                    .filter(|m| normalize_name(&m.name) == stats.key)
                    .collect();
                let n = values.len() as f64;
                let qty = values.iter().map(|m| sanitize(m.quantity)).sum::<f64>() / n;
                let cost = values.iter().map(|m| sanitize(m.unit_cost)).sum::<f64>() / n;

                prop_assert_eq!(stats.usage_count as usize, values.len());
                prop_assert_eq!(stats.average_quantity, Some(qty));
                prop_assert_eq!(stats.average_unit_cost, Some(cost));
                prop_assert!(qty.is_finite() && cost.is_finite());
            }
        }

        #[test]
        fn aggregation_is_idempotent(records in records_strategy()) {
            prop_assert_eq!(aggregate(&records, &[]), aggregate(&records, &[]));
        }

        /// Splitting the input and merging partial folds in either order gives
        /// the sequential result.
        #[test]
        fn partial_folds_merge_in_any_order(records in records_strategy(), split in 0usize..12) {
            let split = split.min(records.len());
            let fold_range = |range: std::ops::Range<usize>| {
                let mut fold = UsageFold::new();
                for i in range {
                    fold.fold_record(i, &records[i]);
                }
                fold
            };

            let sequential = aggregate(&records, &[]);
            let left_first = fold_range(0..split).merge(fold_range(split..records.len())).finish();
            let right_first = fold_range(split..records.len()).merge(fold_range(0..split)).finish();

            prop_assert_eq!(&left_first, &sequential);
            prop_assert_eq!(&right_first, &sequential);
        }
    }
}
