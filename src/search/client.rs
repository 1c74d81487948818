//! HTTP client for the Elasticsearch `_search` endpoint.

use super::types::{ErrorResponse, SearchResponse};
use crate::query::SearchQuery;
use crate::utils::error::SearchError;
use log::{debug, info};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

/// Anything that can answer an aggregation query
///
/// The run loop only needs this seam; tests drive it with canned responses.
/// Searches are issued from a worker thread.
pub trait SearchBackend: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError>;
}

/// Basic-auth credentials for the backend
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Search client for an Elasticsearch cluster
pub struct SearchClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl SearchClient {
    /// Create a new client
    ///
    /// `timeout` bounds each search request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SearchError::RequestFailed)?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&base_url.into()),
            credentials: None,
        })
    }

    /// Authenticate every request with HTTP basic auth
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl SearchBackend for SearchClient {
    fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        let url = format!("{}/{}/_search", self.base_url, query.index);

        debug!("Search request to {}: {}", url, query.body);

        let mut request = self.client.post(&url).json(&query.body);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, creds.password.as_deref());
        }

        let response = request.send().map_err(SearchError::RequestFailed)?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(map_search_error(status.as_u16(), &text));
        }

        let parsed: SearchResponse = response.json().map_err(SearchError::RequestFailed)?;

        if parsed.timed_out {
            return Err(SearchError::InvalidResponse(
                "search timed out on the server".to_string(),
            ));
        }
        if let Some(shards) = &parsed.shards {
            if shards.failed > 0 {
                info!(
                    "{} of {} shards failed; aggregations may be partial",
                    shards.failed, shards.total
                );
            }
        }
        if parsed.aggregations.is_none() {
            return Err(SearchError::InvalidResponse(
                "Missing aggregations field".to_string(),
            ));
        }

        Ok(parsed)
    }
}

/// Strip trailing slashes so paths can be appended
fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Map a non-2xx response body to our error type
fn map_search_error(status: u16, body: &str) -> SearchError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => SearchError::QueryFailed {
            status: err.status.unwrap_or(status),
            reason: err.reason(),
            payload: Some(err.error),
        },
        Err(_) => SearchError::QueryFailed {
            status,
            reason: if body.is_empty() {
                "empty response body".to_string()
            } else {
                body.to_string()
            },
            payload: None,
        },
    }
}

/// Render a structured error payload as indented lines
///
/// Descends into nested objects; of `root_cause` and `failed_shards` lists
/// only the first element is shown.
pub fn format_error_payload(payload: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    format_error_into(payload, 0, &mut lines);
    lines
}

fn format_error_into(value: &Value, depth: usize, lines: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        lines.push(format!("{}{}", "\t".repeat(depth), scalar_text(value)));
        return;
    };

    let pre = "\t".repeat(depth);
    for (key, v) in obj {
        match v {
            Value::Array(items)
                if (key == "failed_shards" || key == "root_cause") && !items.is_empty() =>
            {
                lines.push(format!("{}{}:", pre, key));
                format_error_into(&items[0], depth + 1, lines);
            }
            Value::Object(_) => {
                lines.push(format!("{}{}:", pre, key));
                format_error_into(v, depth + 1, lines);
            }
            Value::Array(items) => {
                lines.push(format!("{}{}:", pre, key));
                for item in items {
                    lines.push(format!("{}\t{}", pre, scalar_text(item)));
                }
            }
            _ => lines.push(format!("{}{}:\t{}", pre, key, scalar_text(v))),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
