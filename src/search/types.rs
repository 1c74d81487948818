//! Types for search requests and responses.
//!
//! Based on the Elasticsearch `_search` API with `size: 0` aggregation queries.

use serde::Deserialize;
use serde_json::Value;

/// Successful `_search` response (hits are never requested)
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    /// Server-side execution time in milliseconds
    #[serde(default)]
    pub took: Option<u64>,

    #[serde(default)]
    pub timed_out: bool,

    #[serde(rename = "_shards", default)]
    pub shards: Option<ShardStats>,

    /// Aggregation tree (kept as raw JSON, flattened later)
    #[serde(default)]
    pub aggregations: Option<Value>,
}

/// Shard accounting of a response
#[derive(Debug, Deserialize)]
pub struct ShardStats {
    pub total: u64,
    pub successful: u64,
    #[serde(default)]
    pub skipped: u64,
    pub failed: u64,
}

/// Error body returned with a non-2xx status
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: Value,
    #[serde(default)]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Most specific human-readable reason in the payload
    pub fn reason(&self) -> String {
        let root_cause = self
            .error
            .get("root_cause")
            .and_then(|rc| rc.get(0))
            .and_then(|rc| rc.get("reason"))
            .and_then(Value::as_str);

        root_cause
            .or_else(|| self.error.get("reason").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| match &self.error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}
