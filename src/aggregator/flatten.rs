//! Flatten a nested bucket tree into composite-key rows.
//!
//! A run's query nests one terms aggregation per grouping level with the
//! metric aggregations at the deepest level only. Walking the tree collects
//! one group-by value per level; at a bucket with no nested buckets left the
//! collected values become the composite key and the leaf metrics its row.

use super::bucket::{Aggregation, Bucket, BucketKey};
use super::merge::FlatAggregations;
use crate::utils::error::FlattenError;
use log::{debug, trace};
use serde_json::Value;
use std::collections::BTreeMap;

/// Group-by values collected from ancestor levels, by level name
pub type KeyPrefix = BTreeMap<String, BucketKey>;

/// Flatten a bucket tree
///
/// **Public** - main entry point for flattening
///
/// # Arguments
/// * `bucket` - Node to flatten (the root `aggregations` object has no key)
/// * `ordered_keys` - Level names of the composite key, outermost first
/// * `level` - Level name this bucket's key belongs to (empty at the root)
/// * `prefix` - Values collected from ancestors, not yet holding this level
///
/// # Errors
/// * `FlattenError::SchemaMismatch` - the levels found in the tree do not
///   line up with `ordered_keys`
pub fn flatten(
    bucket: &Bucket,
    ordered_keys: &[String],
    level: &str,
    prefix: &KeyPrefix,
) -> Result<FlatAggregations, FlattenError> {
    let mut row_key = prefix.clone();
    if let Some(key) = &bucket.key {
        row_key.insert(level.to_string(), key.clone());
    }

    // A grouping level never contributes metrics of its own
    if bucket.has_nested_buckets() {
        let mut results = FlatAggregations::new();
        for (child_name, child) in &bucket.children {
            if let Aggregation::Buckets(buckets) = child {
                for nested in buckets {
                    results.merge(flatten(nested, ordered_keys, child_name, &row_key)?);
                }
            }
        }
        return Ok(results);
    }

    let mut results = FlatAggregations::new();
    let metrics: Vec<(&String, &Value)> = bucket
        .children
        .iter()
        .filter_map(|(name, child)| match child {
            Aggregation::Metric(value) => Some((name, value)),
            Aggregation::Buckets(_) => None,
        })
        .collect();

    if metrics.is_empty() {
        trace!("Leaf bucket under '{}' carries no metrics", level);
        return Ok(results);
    }

    let composite = composite_key(&row_key, ordered_keys)?;
    for (name, value) in metrics {
        results.insert_metric(composite.clone(), name.clone(), value.clone());
    }

    Ok(results)
}

/// Flatten the `aggregations` object of a search response
///
/// `initial` seeds the key prefix with levels that are not part of the tree
/// (period bounds and aggregation unit).
pub fn flatten_response(
    aggregations: &Value,
    ordered_keys: &[String],
    initial: &KeyPrefix,
) -> Result<FlatAggregations, FlattenError> {
    let root = Bucket::from_json(aggregations)?;
    let flat = flatten(&root, ordered_keys, "", initial)?;
    debug!("Flattened response into {} rows", flat.len());
    Ok(flat)
}

/// Materialize the composite key in schema order
///
/// Every schema level must be present and every collected level must be
/// named by the schema.
fn composite_key(
    row_key: &KeyPrefix,
    ordered_keys: &[String],
) -> Result<Vec<BucketKey>, FlattenError> {
    if let Some(extra) = row_key
        .keys()
        .find(|name| !ordered_keys.iter().any(|k| k == *name))
    {
        return Err(FlattenError::SchemaMismatch(format!(
            "level '{}' is not in the key schema {:?}",
            extra, ordered_keys
        )));
    }

    ordered_keys
        .iter()
        .map(|name| {
            row_key.get(name).cloned().ok_or_else(|| {
                FlattenError::SchemaMismatch(format!(
                    "no value for level '{}' (tree provided {:?})",
                    name,
                    row_key.keys().collect::<Vec<_>>()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flatten_single_level() {
        let raw = json!({
            "a": {"buckets": [
                {"key": "x", "doc_count": 4, "count": {"value": 4}},
                {"key": "y", "doc_count": 9, "count": {"value": 9}}
            ]}
        });

        let flat = flatten_response(&raw, &keys(&["a"]), &KeyPrefix::new()).unwrap();

        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get(&[BucketKey::from("x")]).unwrap()["count"], json!(4));
        assert_eq!(flat.get(&[BucketKey::from("y")]).unwrap()["count"], json!(9));
    }

    #[test]
    fn test_flatten_uses_initial_prefix() {
        let raw = json!({
            "gpu_count": {"buckets": [
                {"key": 0, "doc_count": 1, "jobs": {"value": 1}}
            ]}
        });
        let mut initial = KeyPrefix::new();
        initial.insert("start_date".to_string(), BucketKey::from("2024-03-01"));

        let flat = flatten_response(&raw, &keys(&["start_date", "gpu_count"]), &initial).unwrap();

        let expected = vec![BucketKey::from("2024-03-01"), BucketKey::Integer(0)];
        assert_eq!(flat.get(&expected).unwrap()["jobs"], json!(1));
    }

    #[test]
    fn test_grouping_level_metrics_are_ignored() {
        let raw = json!({
            "a": {"buckets": [{
                "key": "x",
                "doc_count": 2,
                "stray": {"value": 100},
                "b": {"buckets": [{"key": "p", "doc_count": 2, "n": {"value": 2}}]}
            }]}
        });

        let flat = flatten_response(&raw, &keys(&["a", "b"]), &KeyPrefix::new()).unwrap();
        let metrics = flat.get(&[BucketKey::from("x"), BucketKey::from("p")]).unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(!metrics.contains_key("stray"));
    }

    #[test]
    fn test_missing_level_is_schema_mismatch() {
        let raw = json!({
            "a": {"buckets": [{"key": "x", "doc_count": 1, "n": {"value": 1}}]}
        });

        let err = flatten_response(&raw, &keys(&["a", "b"]), &KeyPrefix::new()).unwrap_err();
        assert!(matches!(err, FlattenError::SchemaMismatch(_)));
    }

    #[test]
    fn test_extra_level_is_schema_mismatch() {
        let raw = json!({
            "a": {"buckets": [{
                "key": "x",
                "doc_count": 1,
                "b": {"buckets": [{"key": "p", "doc_count": 1, "n": {"value": 1}}]}
            }]}
        });

        let err = flatten_response(&raw, &keys(&["a"]), &KeyPrefix::new()).unwrap_err();
        assert!(matches!(err, FlattenError::SchemaMismatch(_)));
    }

    #[test]
    fn test_leaf_without_metrics_yields_nothing() {
        let raw = json!({"a": {"buckets": [{"key": "x", "doc_count": 3}]}});
        let flat = flatten_response(&raw, &keys(&["a"]), &KeyPrefix::new()).unwrap();
        assert!(flat.is_empty());
    }

    #[test]
    fn test_null_metric_value_is_kept() {
        let raw = json!({"a": {"buckets": [{"key": "x", "doc_count": 0, "max": {"value": null}}]}});
        let flat = flatten_response(&raw, &keys(&["a"]), &KeyPrefix::new()).unwrap();
        assert_eq!(flat.get(&[BucketKey::from("x")]).unwrap()["max"], Value::Null);
    }
}
