//! Typed view of a terms-aggregation response tree.
//!
//! The search backend returns nested JSON where every bucket carries a `key`,
//! a `doc_count` and one entry per sub-aggregation. A sub-aggregation is either
//! another bucket list (`{"buckets": [...]}`) or a metric (`{"value": n}`).

use crate::utils::error::FlattenError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Bucket fields that never name a sub-aggregation
const HOUSEKEEPING_FIELDS: &[&str] = &[
    "key",
    "doc_count",
    "key_as_string",
    "doc_count_error_upper_bound",
    "sum_other_doc_count",
];

/// A group-by value at one level of the tree
///
/// Terms aggregations over keyword, long, double and boolean fields produce
/// string, integer, float and boolean keys respectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketKey {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl BucketKey {
    /// Read a key from its JSON form; arrays, objects and null are not keys
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(BucketKey::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(BucketKey::Integer)
                .or_else(|| n.as_f64().map(BucketKey::Float)),
            Value::String(s) => Some(BucketKey::Text(s.clone())),
            _ => None,
        }
    }

    /// JSON form used in output rows
    pub fn to_json(&self) -> Value {
        match self {
            BucketKey::Bool(b) => Value::Bool(*b),
            BucketKey::Integer(i) => Value::from(*i),
            BucketKey::Float(f) => Value::from(*f),
            BucketKey::Text(s) => Value::String(s.clone()),
        }
    }

    /// String value, if this is a text key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BucketKey::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            BucketKey::Bool(_) => 0,
            BucketKey::Integer(_) => 1,
            BucketKey::Float(_) => 2,
            BucketKey::Text(_) => 3,
        }
    }
}

impl PartialEq for BucketKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BucketKey {}

impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (BucketKey::Bool(a), BucketKey::Bool(b)) => a.cmp(b),
            (BucketKey::Integer(a), BucketKey::Integer(b)) => a.cmp(b),
            (BucketKey::Float(a), BucketKey::Float(b)) => a.total_cmp(b),
            (BucketKey::Text(a), BucketKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for BucketKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            BucketKey::Bool(b) => b.hash(state),
            BucketKey::Integer(i) => i.hash(state),
            BucketKey::Float(f) => f.to_bits().hash(state),
            BucketKey::Text(s) => s.hash(state),
        }
    }
}

impl From<&str> for BucketKey {
    fn from(s: &str) -> Self {
        BucketKey::Text(s.to_string())
    }
}

impl From<String> for BucketKey {
    fn from(s: String) -> Self {
        BucketKey::Text(s)
    }
}

impl From<i64> for BucketKey {
    fn from(i: i64) -> Self {
        BucketKey::Integer(i)
    }
}

/// A named child of a bucket
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Nested grouping level
    Buckets(Vec<Bucket>),
    /// Leaf metric result (`value` may be null for empty min/max/avg)
    Metric(Value),
}

/// One node of the aggregation response tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    /// Group-by value at this level (absent at the root)
    pub key: Option<BucketKey>,

    /// Number of documents in this bucket
    pub doc_count: Option<u64>,

    /// Sub-aggregations by name
    pub children: BTreeMap<String, Aggregation>,
}

impl Bucket {
    /// Parse a bucket (or the root `aggregations` object) from JSON
    ///
    /// # Errors
    /// * `FlattenError::Malformed` - node is not an object, a key is not a
    ///   scalar, a `buckets` field is not an array, or a child object is
    ///   neither a bucket list nor a `value` metric
    pub fn from_json(value: &Value) -> Result<Self, FlattenError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FlattenError::Malformed(format!("bucket is not an object: {}", value)))?;

        let key = match obj.get("key") {
            Some(raw) => Some(BucketKey::from_json(raw).ok_or_else(|| {
                FlattenError::Malformed(format!("unsupported bucket key: {}", raw))
            })?),
            None => None,
        };

        let doc_count = obj.get("doc_count").and_then(Value::as_u64);

        let mut children = BTreeMap::new();
        for (name, child) in obj {
            if HOUSEKEEPING_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let Some(child_obj) = child.as_object() else {
                continue;
            };

            if let Some(buckets) = child_obj.get("buckets") {
                let list = buckets.as_array().ok_or_else(|| {
                    FlattenError::Malformed(format!("'{}.buckets' is not an array", name))
                })?;
                let parsed = list
                    .iter()
                    .map(Bucket::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                children.insert(name.clone(), Aggregation::Buckets(parsed));
            } else if let Some(metric) = child_obj.get("value") {
                children.insert(name.clone(), Aggregation::Metric(metric.clone()));
            } else {
                return Err(FlattenError::Malformed(format!(
                    "'{}' is neither a bucket list nor a single-value metric",
                    name
                )));
            }
        }

        Ok(Self {
            key,
            doc_count,
            children,
        })
    }

    /// True if any child is a nested bucket list
    pub fn has_nested_buckets(&self) -> bool {
        self.children
            .values()
            .any(|c| matches!(c, Aggregation::Buckets(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_terms_response() {
        let raw = json!({
            "gpu_count": {
                "doc_count_error_upper_bound": 0,
                "sum_other_doc_count": 0,
                "buckets": [
                    {"key": 0, "doc_count": 12, "jobs": {"value": 12.0}},
                    {"key": 1, "doc_count": 3, "jobs": {"value": 3.0}}
                ]
            }
        });

        let root = Bucket::from_json(&raw).unwrap();
        assert!(root.key.is_none());
        assert!(root.has_nested_buckets());

        let Aggregation::Buckets(buckets) = &root.children["gpu_count"] else {
            panic!("expected buckets");
        };
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key, Some(BucketKey::Integer(0)));
        assert_eq!(buckets[1].doc_count, Some(3));
        assert_eq!(buckets[1].children["jobs"], Aggregation::Metric(json!(3.0)));
    }

    #[test]
    fn test_key_as_string_is_not_a_child() {
        let raw = json!({"key": 1, "key_as_string": "true", "doc_count": 2, "n": {"value": 2}});
        let bucket = Bucket::from_json(&raw).unwrap();
        assert_eq!(bucket.children.len(), 1);
        assert!(!bucket.has_nested_buckets());
    }

    #[test]
    fn test_malformed_buckets() {
        let raw = json!({"resource": {"buckets": {"a": {}}}});
        assert!(matches!(Bucket::from_json(&raw), Err(FlattenError::Malformed(_))));

        let raw = json!({"key": [1, 2]});
        assert!(Bucket::from_json(&raw).is_err());
    }

    #[test]
    fn test_multi_value_metric_is_rejected() {
        let raw = json!({
            "key": "SiteX",
            "doc_count": 4,
            "wall": {"count": 4, "min": 1.0, "max": 9.0, "avg": 4.5, "sum": 18.0}
        });
        let err = Bucket::from_json(&raw).unwrap_err();
        assert!(matches!(&err, FlattenError::Malformed(msg) if msg.contains("'wall'")));
    }

    #[test]
    fn test_bucket_key_ordering() {
        let mut keys = vec![
            BucketKey::from("b"),
            BucketKey::Integer(2),
            BucketKey::from("a"),
            BucketKey::Integer(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                BucketKey::Integer(-1),
                BucketKey::Integer(2),
                BucketKey::from("a"),
                BucketKey::from("b"),
            ]
        );
        assert_eq!(BucketKey::Float(1.5), BucketKey::Float(1.5));
        assert_ne!(BucketKey::Float(1.0), BucketKey::Integer(1));
    }

    #[test]
    fn test_bucket_key_json() {
        assert_eq!(BucketKey::from_json(&json!(4)), Some(BucketKey::Integer(4)));
        assert_eq!(BucketKey::from_json(&json!(0.5)), Some(BucketKey::Float(0.5)));
        assert_eq!(BucketKey::from_json(&json!(null)), None);
        assert_eq!(BucketKey::from("x").to_json(), json!("x"));
    }
}
