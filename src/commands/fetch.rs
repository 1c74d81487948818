//! Fetch command implementation.
//!
//! The fetch command:
//! 1. Loads registry metadata (cached for 23 hours)
//! 2. Runs every metric query for every date range and sub-query split,
//!    folding the flattened responses into one accumulator
//! 3. Expands the accumulator into rows and enriches them
//! 4. Writes `<output_dir>/<start>_<end>[.incomplete].json`
//!
//! Each search runs on a worker thread while the run waits on its result and
//! on the stop flag. A stop request (Ctrl-C) abandons the search in flight,
//! the rows accumulated so far are written and the file is marked
//! incomplete.

use crate::aggregator::{flatten_response, merge, BucketKey, FlatAggregations, KeyPrefix, Row};
use crate::query::{
    build_query, date_ranges, keys_from_query, metric_queries, reported_end_date,
    search_timeout, subquery_filters, DateRange, Period, QueryParams, SearchQuery,
};
use crate::registry::{enrich_rows, ProjectMap, ResourceMap, TopologyClient};
use crate::output::write_rows;
use crate::search::{
    format_error_payload, Credentials, SearchBackend, SearchClient, SearchResponse,
};
use crate::utils::config::{
    DEFAULT_ES_URL, DEFAULT_LOOKBACK_DAYS, OSPOOL_APS, OSPOOL_ES_INDEX, STOP_POLL_INTERVAL,
};
use crate::utils::error::SearchError;
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Key schema levels that come from the date range rather than the tree
pub const PERIOD_KEYS: [&str; 3] = ["start_date", "end_date", "aggregation_unit"];

/// Arguments for the fetch command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct FetchArgs {
    /// Search backend URL
    pub es_url: String,

    /// Index pattern to query
    pub index: String,

    /// Basic-auth credentials for the backend
    pub credentials: Option<Credentials>,

    /// Exclusive end date of the run
    pub end: NaiveDate,

    /// Period to accumulate metrics over
    pub period: Period,

    /// Minimum number of days to look back
    pub lookback_days: i64,

    /// Directory receiving the JSON output
    pub output_dir: PathBuf,

    /// Also group by wall and wait time buckets
    pub compute_buckets: bool,

    /// Directory holding registry caches
    pub cache_dir: PathBuf,

    /// Access points counted in addition to the built-in list
    pub extra_aps: Vec<String>,
}

impl Default for FetchArgs {
    fn default() -> Self {
        Self {
            es_url: DEFAULT_ES_URL.to_string(),
            index: OSPOOL_ES_INDEX.to_string(),
            credentials: None,
            end: NaiveDate::default(),
            period: Period::Day,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            output_dir: PathBuf::from("."),
            compute_buckets: false,
            cache_dir: PathBuf::from("."),
            extra_aps: Vec::new(),
        }
    }
}

/// Validate fetch arguments
///
/// **Public** - can be called before execute_fetch for early validation
pub fn validate_args(args: &FetchArgs) -> Result<()> {
    if args.es_url.is_empty() {
        anyhow::bail!("Search backend URL cannot be empty");
    }

    if !args.es_url.starts_with("http://") && !args.es_url.starts_with("https://") {
        anyhow::bail!("Search backend URL must start with http:// or https://");
    }

    if args.index.trim().is_empty() {
        anyhow::bail!("Index pattern cannot be empty");
    }

    if args.lookback_days < 0 {
        anyhow::bail!("lookback must not be negative");
    }

    if args.output_dir.as_os_str().is_empty() {
        anyhow::bail!("Output directory cannot be empty");
    }

    date_ranges(args.end, args.period, args.lookback_days)?;

    Ok(())
}

/// Result of a run
#[derive(Debug)]
pub struct FetchOutcome {
    /// File the rows were written to
    pub path: PathBuf,

    /// Enriched rows as written
    pub rows: Vec<Row>,

    /// False if the run was stopped before all sub-queries finished
    pub complete: bool,
}

/// Accumulated query results of a run
#[derive(Debug)]
pub struct QueryRun {
    pub flat: FlatAggregations,
    pub ordered_keys: Vec<String>,
    pub complete: bool,
    pub queries_run: usize,
}

/// Full key schema of a run: period levels, then the terms levels
pub fn ordered_keys(compute_buckets: bool, access_points: &BTreeSet<String>) -> Vec<String> {
    let probe = QueryParams {
        compute_buckets,
        ..Default::default()
    };
    let query = build_query("", 0, 0, &probe, access_points);

    PERIOD_KEYS
        .iter()
        .map(|k| k.to_string())
        .chain(keys_from_query(&query.body))
        .collect()
}

/// Built-in access points plus `extra`
pub fn access_points(extra: &[String]) -> BTreeSet<String> {
    OSPOOL_APS
        .iter()
        .map(|ap| ap.to_string())
        .chain(extra.iter().cloned())
        .collect()
}

/// Output file for a run covering `[period_start, end)`
pub fn output_path(output_dir: &Path, period_start: NaiveDate, end: NaiveDate, complete: bool) -> PathBuf {
    let start = period_start.format("%Y-%m-%dT00:00:00");
    let last = (end - Days::new(1)).format("%Y-%m-%dT23:59:59");
    let suffix = if complete { "" } else { ".incomplete" };
    output_dir.join(format!("{}_{}{}.json", start, last, suffix))
}

/// Key prefix shared by every row of one date range
fn range_prefix(range: &DateRange, period: Period) -> KeyPrefix {
    let mut prefix = KeyPrefix::new();
    prefix.insert(
        "start_date".to_string(),
        BucketKey::from(range.start.format("%Y-%m-%d").to_string()),
    );
    prefix.insert(
        "end_date".to_string(),
        BucketKey::from(reported_end_date(range.end, period).format("%Y-%m-%d").to_string()),
    );
    prefix.insert("aggregation_unit".to_string(), BucketKey::from(period.as_str()));
    prefix
}

/// Run one search on a worker thread, waiting until it answers or `stop` is set
///
/// Returns `None` once a stop is requested; the worker is left to finish on
/// its own and its answer is dropped.
fn search_until_stopped<B>(
    backend: &Arc<B>,
    query: SearchQuery,
    stop: &AtomicBool,
) -> Option<Result<SearchResponse, SearchError>>
where
    B: SearchBackend + 'static,
{
    let (tx, rx) = channel::bounded(1);
    let worker = Arc::clone(backend);
    thread::spawn(move || {
        // The receiver is gone if the run was stopped meanwhile
        let _ = tx.send(worker.search(&query));
    });

    loop {
        match rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(result) => return Some(result),
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Some(Err(SearchError::InvalidResponse(
                    "search worker exited without an answer".to_string(),
                )))
            }
        }
    }
}

/// Run every sub-query of a fetch against `backend`
///
/// **Public** - the query loop without file or registry I/O
///
/// Checks `stop` before each sub-query and while waiting on one; once set,
/// returns what has been accumulated with `complete == false`.
///
/// # Errors
/// * Any failed search aborts the run (the backend's error payload is logged)
/// * A response whose tree does not match the key schema
pub fn run_queries<B>(backend: &Arc<B>, args: &FetchArgs, stop: &AtomicBool) -> Result<QueryRun>
where
    B: SearchBackend + 'static,
{
    let ranges = date_ranges(args.end, args.period, args.lookback_days)?;
    let aps = access_points(&args.extra_aps);
    let keys = ordered_keys(args.compute_buckets, &aps);
    let queries = metric_queries();
    let end_ts = crate::query::timestamp(args.end);

    debug!("Key schema: {:?}", keys);

    let mut flat = FlatAggregations::new();
    let mut queries_run = 0;

    for (i_range, range) in ranges.iter().enumerate() {
        let start_ts = range.start_ts();
        let range_end_ts = range.end_ts();
        let prefix = range_prefix(range, args.period);
        let days_in_query = (args.end - range.start).num_days();
        let splits = subquery_filters(args.compute_buckets, days_in_query);

        for (i_query, metric) in queries.iter().enumerate() {
            for (i_split, split) in splits.iter().enumerate() {
                if stop.load(Ordering::SeqCst) {
                    warn!("Exiting early due to stop request...");
                    return Ok(QueryRun {
                        flat,
                        ordered_keys: keys,
                        complete: false,
                        queries_run,
                    });
                }

                let params = metric.params(start_ts, range_end_ts, args.compute_buckets, split);
                let query = build_query(&args.index, start_ts, end_ts, &params, &aps);

                info!(
                    "Running {} ({} of {}) - {} of {} date ranges - {} of {} subqueries...",
                    metric.name,
                    i_query + 1,
                    queries.len(),
                    i_range + 1,
                    ranges.len(),
                    i_split + 1,
                    splits.len()
                );
                let t0 = Instant::now();

                let Some(result) = search_until_stopped(backend, query, stop) else {
                    warn!("Abandoning {} query due to stop request...", metric.name);
                    return Ok(QueryRun {
                        flat,
                        ordered_keys: keys,
                        complete: false,
                        queries_run,
                    });
                };
                let response = result
                    .map_err(|e| {
                        log_search_error(&e);
                        e
                    })
                    .with_context(|| format!("Search for {} failed", metric.name))?;

                info!("...took {:.2} seconds", t0.elapsed().as_secs_f64());

                let aggregations = response
                    .aggregations
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                let result = flatten_response(&aggregations, &keys, &prefix)
                    .with_context(|| format!("Failed to flatten {} response", metric.name))?;

                flat = merge(flat, result);
                queries_run += 1;
            }
        }
    }

    Ok(QueryRun {
        flat,
        ordered_keys: keys,
        complete: true,
        queries_run,
    })
}

fn log_search_error(e: &SearchError) {
    error!("{}", e);
    if let SearchError::QueryFailed {
        payload: Some(payload),
        ..
    } = e
    {
        for line in format_error_payload(payload) {
            error!("{}", line);
        }
    }
}

/// Run a fetch with the given collaborators and write the output file
///
/// **Public** - everything `execute_fetch` does after connecting
pub fn run_fetch<B>(
    backend: &Arc<B>,
    args: &FetchArgs,
    resources: &ResourceMap,
    projects: &ProjectMap,
    stop: &AtomicBool,
) -> Result<FetchOutcome>
where
    B: SearchBackend + 'static,
{
    let start_time = Instant::now();
    let ranges = date_ranges(args.end, args.period, args.lookback_days)?;
    let period_start = ranges.last().map(|r| r.start).unwrap_or(args.end);

    info!("Step 2/4: Querying {} date range(s)...", ranges.len());
    let run = run_queries(backend, args, stop)?;
    info!("Ran {} queries, {} composite keys", run.queries_run, run.flat.len());

    info!("Step 3/4: Flattening results to full JSON...");
    let mut rows = run.flat.into_rows(&run.ordered_keys);
    enrich_rows(&mut rows, resources, projects);

    info!("Step 4/4: Writing output...");
    let path = output_path(&args.output_dir, period_start, args.end, run.complete);
    write_rows(&rows, &path).context("Failed to write output JSON")?;

    info!("✓ Rows written to: {}", path.display());
    info!("Fetch completed in {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(FetchOutcome {
        path,
        rows,
        complete: run.complete,
    })
}

/// Execute the fetch command
///
/// **Public** - main entry point called from main.rs
pub fn execute_fetch(args: FetchArgs, stop: &AtomicBool) -> Result<FetchOutcome> {
    info!("Starting fetch with arguments: {:?}", args);

    let ranges = date_ranges(args.end, args.period, args.lookback_days)?;
    let period_start = ranges.last().map(|r| r.start).unwrap_or(args.end);
    let timeout = search_timeout((args.end - period_start).num_days());

    info!("Step 1/4: Loading registry metadata...");
    let topology = TopologyClient::new(&args.cache_dir).context("Failed to create registry client")?;
    let resources = topology
        .resource_map()
        .context("Failed to load Topology resource data")?;
    let projects = topology
        .project_map()
        .context("Failed to load Topology project data")?;

    debug!("Search timeout: {:?}", timeout);
    let client = SearchClient::new(&args.es_url, timeout)
        .context("Failed to create search client")?
        .with_credentials(args.credentials.clone());
    let client = Arc::new(client);

    run_fetch(&client, &args, &resources, &projects, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_validate_args_valid() {
        assert!(validate_args(&FetchArgs::default()).is_ok());
    }

    #[test]
    fn test_validate_args_bad_url() {
        let args = FetchArgs {
            es_url: "ftp://es:9200".to_string(),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());

        let args = FetchArgs {
            es_url: String::new(),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_negative_lookback() {
        let args = FetchArgs {
            lookback_days: -1,
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_lookback_out_of_range() {
        let args = FetchArgs {
            end: date("2024-03-11"),
            lookback_days: 400_000_000,
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_output_path() {
        let path = output_path(Path::new("out"), date("2024-02-01"), date("2024-03-11"), true);
        assert_eq!(path, PathBuf::from("out/2024-02-01T00:00:00_2024-03-10T23:59:59.json"));

        let path = output_path(Path::new("out"), date("2024-02-01"), date("2024-03-11"), false);
        assert_eq!(
            path,
            PathBuf::from("out/2024-02-01T00:00:00_2024-03-10T23:59:59.incomplete.json")
        );
    }

    #[test]
    fn test_ordered_keys() {
        let keys = ordered_keys(false, &access_points(&[]));
        assert_eq!(
            keys,
            vec![
                "start_date",
                "end_date",
                "aggregation_unit",
                "gpu_count",
                "processor_count",
                "system_account",
                "project",
                "resource"
            ]
        );
        assert_eq!(ordered_keys(true, &access_points(&[])).len(), 10);
    }

    #[test]
    fn test_access_points_include_extra() {
        let aps = access_points(&["my-ap.example.org".to_string()]);
        assert!(aps.contains("my-ap.example.org"));
        assert!(aps.contains("ap40.uw.osg-htc.org"));
    }

    #[test]
    fn test_range_prefix() {
        let range = DateRange::new(date("2024-03-01"), date("2024-03-11"));
        let prefix = range_prefix(&range, Period::Month);
        assert_eq!(prefix["start_date"], BucketKey::from("2024-03-01"));
        assert_eq!(prefix["end_date"], BucketKey::from("2024-03-31"));
        assert_eq!(prefix["aggregation_unit"], BucketKey::from("month"));
    }
}
