//! OSPool Usage
//!
//! Fetches OSPool job accounting aggregates from Elasticsearch and
//! reference metadata from the OSG Topology registry, and writes them as
//! flat JSON rows for downstream reporting and test fixtures.
//!
//! This crate provides the core implementation for the
//! `ospool-usage` CLI tool.
//!
//! ## Getting Started
//!
//! ```bash
//! ospool-usage fetch --end 2024-03-11 --period month --output-dir out/
//! ospool-usage --help
//! ```

pub mod aggregator;
pub mod commands;
pub mod output;
pub mod query;
pub mod registry;
pub mod search;
pub mod utils;
