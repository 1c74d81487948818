//! Search request construction.
//!
//! This module handles:
//! - Accounting periods and the date ranges of a run
//! - The nested terms-aggregation request body
//! - Per-metric queries and their sub-query splits

pub mod builder;
pub mod period;
pub mod scripts;

// Re-export main types
pub use builder::{
    build_query, keys_from_query, metric_queries, subquery_filters, MetricQuery, QueryParams,
    SearchQuery,
};
pub use period::{
    date_ranges, parse_date, period_end, period_start, reported_end_date, search_timeout,
    timestamp, DateRange, Period,
};
