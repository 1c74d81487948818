//! Aggregation response flattening and accumulation.
//!
//! This module transforms nested terms-aggregation responses into:
//! - Composite-key rows (one per deepest bucket)
//! - A run-wide accumulator merged across independent queries

pub mod bucket;
pub mod flatten;
pub mod merge;

// Re-export main types and functions
pub use bucket::{Aggregation, Bucket, BucketKey};
pub use flatten::{flatten, flatten_response, KeyPrefix};
pub use merge::{merge, CompositeKey, FlatAggregations, Metrics, Row};
