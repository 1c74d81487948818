//! Output writers for run results.
//!
//! This module handles writing data to disk:
//! - Row files (pretty JSON arrays)
//! - Registry caches and fixture files (atomic JSON writes)

pub mod json;

// Re-export main functions
pub use json::{read_rows, write_json_atomic, write_rows};
