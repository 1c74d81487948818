use ospool_usage::aggregator::{flatten_response, merge, BucketKey, FlatAggregations, KeyPrefix};
use ospool_usage::output::{read_rows, write_rows};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn schema(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn single(key: &[BucketKey], name: &str, value: Value) -> FlatAggregations {
    let mut flat = FlatAggregations::new();
    flat.insert_metric(key.to_vec(), name, value);
    flat
}

#[test]
fn test_two_level_tree() {
    let tree = json!({
        "a": {
            "doc_count_error_upper_bound": 0,
            "sum_other_doc_count": 0,
            "buckets": [
                {"key": "x", "doc_count": 3, "count": {"value": 3}},
                {"key": "y", "doc_count": 7, "count": {"value": 7}}
            ]
        }
    });

    let flat = flatten_response(&tree, &schema(&["a"]), &KeyPrefix::new()).unwrap();

    assert_eq!(flat.len(), 2);
    assert_eq!(flat.get(&[BucketKey::from("x")]).unwrap()["count"], json!(3));
    assert_eq!(flat.get(&[BucketKey::from("y")]).unwrap()["count"], json!(7));
}

#[test]
fn test_three_level_tree_with_empty_branch() {
    let tree = json!({
        "gpu_count": {"buckets": [
            {"key": 0, "doc_count": 4, "processor_count": {"buckets": [
                {"key": 1, "doc_count": 4, "system_account": {"buckets": [
                    {"key": "alice", "doc_count": 4, "jobs": {"value": 4}}
                ]}},
                {"key": 8, "doc_count": 0, "system_account": {"buckets": []}}
            ]}},
            {"key": 1, "doc_count": 0, "processor_count": {"buckets": []}}
        ]}
    });
    let keys = schema(&["gpu_count", "processor_count", "system_account"]);

    let flat = flatten_response(&tree, &keys, &KeyPrefix::new()).unwrap();

    let expected = single(
        &[BucketKey::Integer(0), BucketKey::Integer(1), "alice".into()],
        "jobs",
        json!(4),
    );
    assert_eq!(flat, expected);
}

#[test]
fn test_merge_unions_metrics_of_a_key() {
    let x: Vec<BucketKey> = vec!["x".into()];
    let merged = merge(
        single(&x, "count", json!(5)),
        single(&x, "sum", json!(10)),
    );

    let metrics = merged.get(&x).unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics["count"], json!(5));
    assert_eq!(metrics["sum"], json!(10));
}

#[test]
fn test_date_partitioned_query_merges_to_unsplit_result() {
    let keys = schema(&["start_date", "resource"]);
    let day = |date: &str| {
        let mut prefix = KeyPrefix::new();
        prefix.insert("start_date".to_string(), date.into());
        prefix
    };
    let tree = |resource: &str, n: i64| {
        json!({"resource": {"buckets": [{"key": resource, "jobs": {"value": n}}]}})
    };

    let first = flatten_response(&tree("SiteA", 1), &keys, &day("2024-03-01")).unwrap();
    let second = flatten_response(&tree("SiteB", 2), &keys, &day("2024-03-02")).unwrap();

    let unsplit = flatten_response(
        &json!({"start_date": {"buckets": [
            {"key": "2024-03-01", "resource": {"buckets": [{"key": "SiteA", "jobs": {"value": 1}}]}},
            {"key": "2024-03-02", "resource": {"buckets": [{"key": "SiteB", "jobs": {"value": 2}}]}}
        ]}}),
        &keys,
        &KeyPrefix::new(),
    )
    .unwrap();

    assert_eq!(merge(first.clone(), second.clone()), unsplit);
    assert_eq!(merge(second, first), unsplit);
}

#[test]
fn test_rows_survive_json_round_trip() {
    let keys = schema(&["gpu_count", "system_account"]);
    let tree = json!({
        "gpu_count": {"buckets": [
            {"key": 0, "system_account": {"buckets": [
                {"key": "alice", "wallduration": {"value": 12.5}, "running_job_count": {"value": 2}},
                {"key": "bob", "wallduration": {"value": null}, "running_job_count": {"value": 0}}
            ]}}
        ]}
    });
    let rows = flatten_response(&tree, &keys, &KeyPrefix::new())
        .unwrap()
        .into_rows(&keys);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rows.json");
    write_rows(&rows, &path).unwrap();

    let loaded = read_rows(&path).unwrap();
    assert_eq!(loaded, rows);
    assert_eq!(loaded[1]["wallduration"], Value::Null);
    assert_eq!(loaded[0]["system_account"], json!("alice"));
}
