//! Search request bodies for the OSPool accounting run.
//!
//! Every request nests the same terms aggregations in the same order
//! (`gpu_count` > `processor_count` > `system_account` > `project` >
//! `resource`, optionally wrapped by the wall and wait time buckets) and puts
//! its metrics at the deepest level. Each terms level sets a `missing`
//! sentinel so every bucket carries a key.

use super::scripts;
use crate::utils::config::{NON_OSPOOL_RESOURCES, OSPOOL_COLLECTORS};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::ops::Range;

/// A request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub index: String,
    pub body: Value,
}

/// Per-query additions to the base request
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Metric aggregations at the deepest level
    pub final_aggs: Map<String, Value>,

    /// Extra runtime fields by name
    pub extra_mappings: Map<String, Value>,

    /// Extra `bool.filter` clauses
    pub extra_filters: Vec<Value>,

    /// Group by wall and wait time buckets
    pub compute_buckets: bool,

    pub add_start_date: bool,
    pub add_end_date: bool,
}

/// Build a request over jobs recorded in `[period_start_ts, period_end_ts)`
///
/// `access_points` lists the schedds whose jobs count towards the OSPool
/// when they carry no `LastRemotePool`.
pub fn build_query(
    index: &str,
    period_start_ts: i64,
    period_end_ts: i64,
    params: &QueryParams,
    access_points: &BTreeSet<String>,
) -> SearchQuery {
    let mut runtime_mappings = Map::new();
    runtime_mappings.insert(
        "ResourceName".to_string(),
        scripts::runtime_field("keyword", scripts::RESOURCE_NAME),
    );
    for (name, mapping) in &params.extra_mappings {
        runtime_mappings.insert(name.clone(), mapping.clone());
    }

    if params.add_start_date || params.compute_buckets {
        runtime_mappings.insert(
            "JobThisStartDate".to_string(),
            scripts::runtime_field("long", scripts::JOB_START_DATE),
        );
    }
    if params.add_end_date || params.compute_buckets {
        runtime_mappings.insert(
            "JobThisEndDate".to_string(),
            scripts::runtime_field("long", scripts::JOB_END_DATE),
        );
    }

    let mut aggs = grouping_aggs(Value::Object(params.final_aggs.clone()));

    if params.compute_buckets {
        runtime_mappings.insert(
            "JobWaitTimeBucket".to_string(),
            scripts::runtime_field("long", &scripts::wait_time_bucket()),
        );
        runtime_mappings.insert(
            "JobWallTimeBucket".to_string(),
            scripts::runtime_field("long", &scripts::wall_time_bucket()),
        );
        aggs = json!({
            "job_wall_time_bucket": {
                "terms": {"field": "JobWallTimeBucket", "size": 9},
                "aggs": {
                    "job_wait_time_bucket": {
                        "terms": {"field": "JobWaitTimeBucket", "size": 9},
                        "aggs": aggs,
                    },
                },
            },
        });
    }

    let mut filters = vec![
        json!({"range": {"RecordTime": {"gte": period_start_ts, "lt": period_end_ts}}}),
        json!({"term": {"JobUniverse": 5}}),
        json!({"range": {"RemoteWallClockTime": {"gt": 0}}}),
        json!({"range": {"NumJobStarts": {"gt": 0}}}),
    ];
    filters.extend(params.extra_filters.iter().cloned());

    let body = json!({
        "size": 0,
        "track_scores": false,
        "track_total_hits": false,
        "_source": false,
        "runtime_mappings": runtime_mappings,
        "aggs": aggs,
        "query": {
            "bool": {
                "filter": filters,
                "minimum_should_match": 1,
                "should": [
                    {"bool": {
                        "filter": [
                            {"terms": {"ScheddName.keyword": access_points}},
                        ],
                        "must_not": [
                            {"exists": {"field": "LastRemotePool"}},
                        ],
                    }},
                    {"terms": {"LastRemotePool.keyword": OSPOOL_COLLECTORS}},
                ],
                "must_not": [
                    {"terms": {"ResourceName": NON_OSPOOL_RESOURCES}},
                ],
            },
        },
    });

    SearchQuery {
        index: index.to_string(),
        body,
    }
}

/// Fixed grouping levels with `final_aggs` at the bottom
fn grouping_aggs(final_aggs: Value) -> Value {
    json!({
        "gpu_count": {
            "terms": {"field": "RequestGpus", "missing": 0, "size": 8},
            "aggs": {
                "processor_count": {
                    "terms": {"field": "RequestCpus", "missing": 1, "size": 64},
                    "aggs": {
                        "system_account": {
                            "terms": {"field": "Owner.keyword", "missing": "Unknown", "size": 512},
                            "aggs": {
                                "project": {
                                    "terms": {"field": "ProjectName.keyword", "missing": "Unknown", "size": 512},
                                    "aggs": {
                                        "resource": {
                                            "terms": {"field": "ResourceName", "size": 512},
                                            "aggs": final_aggs,
                                        },
                                    },
                                },
                            },
                        },
                    },
                },
            },
        },
    })
}

/// Names of the nested terms aggregations, outermost first
///
/// Descends through `aggs` while every entry is a terms aggregation; the
/// first level holding anything else is the metric level.
pub fn keys_from_query(body: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    let mut node = body;

    while let Some(aggs) = node.get("aggs").and_then(Value::as_object) {
        let Some((name, next)) = aggs.iter().find(|(_, agg)| agg.get("terms").is_some()) else {
            break;
        };
        if aggs.values().any(|agg| agg.get("terms").is_none()) {
            break;
        }
        keys.push(name.clone());
        node = next;
    }

    keys
}

/// Which time column a metric query restricts to the range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFilter {
    /// `attr` falls inside `[start, end)`
    Within(&'static str),
    /// `left < end` and `right >= start`: the interval overlaps the range
    Overlapping {
        left: &'static str,
        right: &'static str,
    },
}

/// Runtime field a metric query sums over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodField {
    WaitTime,
    WallTime,
}

/// One metric-producing query of a run
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub name: &'static str,
    pub final_aggs: Map<String, Value>,
    pub range: RangeFilter,
    pub period_field: Option<PeriodField>,
    pub add_start_date: bool,
    pub add_end_date: bool,
}

impl MetricQuery {
    /// Range clauses for `[start_ts, end_ts)`
    pub fn range_filters(&self, start_ts: i64, end_ts: i64) -> Vec<Value> {
        match self.range {
            RangeFilter::Within(attr) => {
                vec![json!({"range": {attr: {"gte": start_ts, "lt": end_ts}}})]
            }
            RangeFilter::Overlapping { left, right } => vec![
                json!({"range": {left: {"lt": end_ts}}}),
                json!({"range": {right: {"gte": start_ts}}}),
            ],
        }
    }

    /// Runtime fields clipped to `[start_ts, end_ts)`
    pub fn extra_mappings(&self, start_ts: i64, end_ts: i64) -> Map<String, Value> {
        let mut mappings = Map::new();
        match self.period_field {
            Some(PeriodField::WaitTime) => {
                mappings.insert(
                    "PeriodWaitTime".to_string(),
                    scripts::runtime_field("long", &scripts::period_wait_time(start_ts, end_ts)),
                );
            }
            Some(PeriodField::WallTime) => {
                mappings.insert(
                    "PeriodWallTime".to_string(),
                    scripts::runtime_field("long", &scripts::period_wall_time(start_ts, end_ts)),
                );
            }
            None => {}
        }
        mappings
    }

    /// Parameters for one sub-query of this metric over `[start_ts, end_ts)`
    pub fn params(
        &self,
        start_ts: i64,
        end_ts: i64,
        compute_buckets: bool,
        split_filters: &[Value],
    ) -> QueryParams {
        let mut extra_filters = self.range_filters(start_ts, end_ts);
        extra_filters.extend(split_filters.iter().cloned());

        QueryParams {
            final_aggs: self.final_aggs.clone(),
            extra_mappings: self.extra_mappings(start_ts, end_ts),
            extra_filters,
            compute_buckets,
            add_start_date: self.add_start_date,
            add_end_date: self.add_end_date,
        }
    }
}

fn value_count(name: &str) -> Map<String, Value> {
    let mut aggs = Map::new();
    aggs.insert(name.to_string(), json!({"value_count": {"field": "RecordTime"}}));
    aggs
}

/// The metric queries issued for every date range, in issue order
///
/// Metric names never overlap between queries.
pub fn metric_queries() -> Vec<MetricQuery> {
    let mut wallduration = Map::new();
    wallduration.insert("wallduration".to_string(), json!({"sum": {"field": "PeriodWallTime"}}));
    wallduration.extend(value_count("running_job_count"));

    let mut waitduration = Map::new();
    waitduration.insert("waitduration".to_string(), json!({"sum": {"field": "PeriodWaitTime"}}));

    vec![
        MetricQuery {
            name: "submitted_job_count",
            final_aggs: value_count("submitted_job_count"),
            range: RangeFilter::Within("QDate"),
            period_field: None,
            add_start_date: false,
            add_end_date: false,
        },
        MetricQuery {
            name: "ended_job_count",
            final_aggs: value_count("ended_job_count"),
            range: RangeFilter::Within("JobThisEndDate"),
            period_field: None,
            add_start_date: false,
            add_end_date: true,
        },
        MetricQuery {
            name: "started_job_count",
            final_aggs: value_count("started_job_count"),
            range: RangeFilter::Within("JobThisStartDate"),
            period_field: None,
            add_start_date: true,
            add_end_date: false,
        },
        MetricQuery {
            name: "waitduration",
            final_aggs: waitduration,
            range: RangeFilter::Overlapping {
                left: "QDate",
                right: "JobThisStartDate",
            },
            period_field: Some(PeriodField::WaitTime),
            add_start_date: true,
            add_end_date: false,
        },
        MetricQuery {
            name: "wallduration",
            final_aggs: wallduration,
            range: RangeFilter::Overlapping {
                left: "JobThisStartDate",
                right: "JobThisEndDate",
            },
            period_field: Some(PeriodField::WallTime),
            add_start_date: true,
            add_end_date: true,
        },
    ]
}

/// Bucket value range a sub-query is restricted to (`None` = unrestricted)
pub type BucketSplit = Option<Range<u8>>;

/// Wall and wait bucket splits for a query reaching `days` back
///
/// Longer windows produce more buckets than the backend will return in one
/// response, so they are cut into sub-queries over disjoint bucket ranges.
pub fn bucket_splits(days: i64) -> (Vec<BucketSplit>, Vec<BucketSplit>) {
    let halves = || vec![Some(0..4), Some(4..9)];
    let quarters = || vec![Some(0..2), Some(2..4), Some(4..6), Some(6..9)];

    match days {
        d if d < 60 => (vec![None], vec![None]),
        d if d < 120 => (halves(), vec![None]),
        d if d < 240 => (halves(), halves()),
        d if d < 480 => (quarters(), halves()),
        _ => (quarters(), quarters()),
    }
}

/// Filter sets, one per sub-query; a single empty set when not splitting
pub fn subquery_filters(compute_buckets: bool, days: i64) -> Vec<Vec<Value>> {
    if !compute_buckets {
        return vec![Vec::new()];
    }

    let (wall_splits, wait_splits) = bucket_splits(days);
    let mut sets = Vec::with_capacity(wall_splits.len() * wait_splits.len());
    for wall in &wall_splits {
        for wait in &wait_splits {
            let mut filters = Vec::new();
            if let Some(range) = wall {
                filters.push(json!({"terms": {"JobWallTimeBucket": range.clone().collect::<Vec<u8>>()}}));
            }
            if let Some(range) = wait {
                filters.push(json!({"terms": {"JobWaitTimeBucket": range.clone().collect::<Vec<u8>>()}}));
            }
            sets.push(filters);
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aps() -> BTreeSet<String> {
        BTreeSet::from(["ap40.uw.osg-htc.org".to_string()])
    }

    #[test]
    fn test_keys_from_query() {
        let query = build_query("idx", 0, 10, &QueryParams::default(), &aps());
        assert_eq!(
            keys_from_query(&query.body),
            vec!["gpu_count", "processor_count", "system_account", "project", "resource"]
        );
    }

    #[test]
    fn test_keys_from_query_with_buckets() {
        let params = QueryParams {
            final_aggs: value_count("n"),
            compute_buckets: true,
            ..Default::default()
        };
        let query = build_query("idx", 0, 10, &params, &aps());
        let keys = keys_from_query(&query.body);
        assert_eq!(keys.len(), 7);
        assert_eq!(keys[0], "job_wall_time_bucket");
        assert_eq!(keys[1], "job_wait_time_bucket");
        assert_eq!(keys[6], "resource");
    }

    #[test]
    fn test_runtime_mappings() {
        let params = QueryParams {
            add_end_date: true,
            ..Default::default()
        };
        let query = build_query("idx", 0, 10, &params, &aps());
        let mappings = query.body["runtime_mappings"].as_object().unwrap();
        assert!(mappings.contains_key("ResourceName"));
        assert!(mappings.contains_key("JobThisEndDate"));
        assert!(!mappings.contains_key("JobThisStartDate"));
        assert!(!mappings.contains_key("JobWallTimeBucket"));
    }

    #[test]
    fn test_filters_include_period_and_extra() {
        let params = QueryParams {
            extra_filters: vec![json!({"term": {"x": 1}})],
            ..Default::default()
        };
        let query = build_query("idx", 100, 200, &params, &aps());
        let filters = query.body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters.len(), 5);
        assert_eq!(filters[0]["range"]["RecordTime"]["gte"], json!(100));
        assert_eq!(filters[0]["range"]["RecordTime"]["lt"], json!(200));
        assert_eq!(filters[4], json!({"term": {"x": 1}}));
        assert_eq!(
            query.body["query"]["bool"]["should"][0]["bool"]["filter"][0]["terms"]["ScheddName.keyword"],
            json!(["ap40.uw.osg-htc.org"])
        );
    }

    #[test]
    fn test_metric_names_are_disjoint() {
        let mut names: Vec<String> = metric_queries()
            .iter()
            .flat_map(|q| q.final_aggs.keys().cloned())
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 6);
    }

    #[test]
    fn test_range_filters() {
        let queries = metric_queries();
        let submitted = &queries[0];
        assert_eq!(
            submitted.range_filters(1, 2),
            vec![json!({"range": {"QDate": {"gte": 1, "lt": 2}}})]
        );

        let wall = queries.iter().find(|q| q.name == "wallduration").unwrap();
        assert_eq!(
            wall.range_filters(1, 2),
            vec![
                json!({"range": {"JobThisStartDate": {"lt": 2}}}),
                json!({"range": {"JobThisEndDate": {"gte": 1}}}),
            ]
        );
        assert!(wall.extra_mappings(1, 2).contains_key("PeriodWallTime"));
    }

    #[test]
    fn test_subquery_filters() {
        assert_eq!(subquery_filters(false, 1000), vec![Vec::<Value>::new()]);
        assert_eq!(subquery_filters(true, 30).len(), 1);
        assert_eq!(subquery_filters(true, 90).len(), 2);
        assert_eq!(subquery_filters(true, 200).len(), 4);
        assert_eq!(subquery_filters(true, 300).len(), 8);
        assert_eq!(subquery_filters(true, 600).len(), 16);

        let sets = subquery_filters(true, 90);
        assert_eq!(sets[0], vec![json!({"terms": {"JobWallTimeBucket": [0, 1, 2, 3]}})]);
        assert_eq!(sets[1], vec![json!({"terms": {"JobWallTimeBucket": [4, 5, 6, 7, 8]}})]);
    }
}
