//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use thiserror::Error;

/// Errors that can occur while talking to the search backend
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Search failed with HTTP {status}: {reason}")]
    QueryFailed {
        status: u16,
        reason: String,
        /// Structured error payload returned by the backend, if any
        payload: Option<serde_json::Value>,
    },

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}

/// Errors that can occur while flattening an aggregation response
#[derive(Error, Debug, PartialEq)]
pub enum FlattenError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Malformed aggregation response: {0}")]
    Malformed(String),
}

/// Errors that can occur while building queries
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown period '{0}' (expected day, month, quarter or year)")]
    UnknownPeriod(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Date out of range: {0}")]
    OutOfRange(String),
}

/// Errors that can occur while fetching or parsing registry metadata
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Registry returned HTTP {0}")]
    BadStatus(u16),

    #[error("Malformed registry XML: {0}")]
    Malformed(String),

    #[error("Cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("Cache serialization failed: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
