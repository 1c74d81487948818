//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod fetch;
pub mod resources;
pub mod utils;

// Re-export main command functions
pub use fetch::{
    execute_fetch, run_fetch, run_queries, validate_args, FetchArgs, FetchOutcome, QueryRun,
};
pub use resources::{execute_resources, write_fixtures};
pub use utils::{display_schema, display_version, summarize_rows, validate_rows_file, RowSummary};
