//! Accumulator of flattened aggregation results.
//!
//! Every query of a run (one per metric, date range and sub-query split)
//! flattens into a `FlatAggregations`; the run folds them together with
//! [`merge`]. Queries contribute disjoint metric names to the same key space,
//! so merging is a union per composite key and the result does not depend on
//! the order queries were issued in.

use super::bucket::BucketKey;
use log::debug;
use serde_json::{Map, Value};
use std::collections::btree_map::{self, BTreeMap};

/// Ordered tuple of group-by values identifying one output row
pub type CompositeKey = Vec<BucketKey>;

/// Metric name -> value
pub type Metrics = BTreeMap<String, Value>;

/// One output row before enrichment
pub type Row = Map<String, Value>;

/// Composite key -> merged metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatAggregations {
    entries: BTreeMap<CompositeKey, Metrics>,
}

impl FlatAggregations {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of composite keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metrics recorded for a composite key
    pub fn get(&self, key: &[BucketKey]) -> Option<&Metrics> {
        self.entries.get(key)
    }

    /// Set one metric for a composite key, creating the entry if needed
    pub fn insert_metric(&mut self, key: CompositeKey, name: impl Into<String>, value: Value) {
        self.entries.entry(key).or_default().insert(name.into(), value);
    }

    /// Merge another result into this one
    ///
    /// Absent keys are inserted wholesale; present keys take a field-wise
    /// update where incoming metrics replace same-named ones.
    pub fn merge(&mut self, incoming: FlatAggregations) {
        for (key, metrics) in incoming.entries {
            match self.entries.entry(key) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(metrics);
                }
                btree_map::Entry::Occupied(mut slot) => {
                    slot.get_mut().extend(metrics);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompositeKey, &Metrics)> {
        self.entries.iter()
    }

    /// Distinct metric names across all entries
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Expand into flat rows: one field per key schema entry plus the metrics
    ///
    /// `ordered_keys` must be the schema the entries were flattened with.
    pub fn into_rows(self, ordered_keys: &[String]) -> Vec<Row> {
        debug!(
            "Expanding {} composite keys into rows ({} key fields)",
            self.entries.len(),
            ordered_keys.len()
        );

        self.entries
            .into_iter()
            .map(|(key, metrics)| {
                let mut row = Row::new();
                for (name, value) in ordered_keys.iter().zip(key.iter()) {
                    row.insert(name.clone(), value.to_json());
                }
                for (name, value) in metrics {
                    row.insert(name, value);
                }
                row
            })
            .collect()
    }
}

/// Fold `incoming` into `total` and hand the accumulator back
pub fn merge(mut total: FlatAggregations, incoming: FlatAggregations) -> FlatAggregations {
    total.merge(incoming);
    total
}
