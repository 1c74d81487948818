//! Search backend access.

pub mod client;
pub mod types;

pub use client::{format_error_payload, Credentials, SearchBackend, SearchClient};
pub use types::{ErrorResponse, SearchResponse, ShardStats};
