//! OSPool Usage CLI
//!
//! Fetches OSPool job accounting aggregates and Topology registry metadata
//! and writes them as flat JSON reference fixtures.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::warn;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ospool_usage::commands::{
    display_schema, display_version, execute_fetch, execute_resources, validate_args,
    validate_rows_file, FetchArgs,
};
use ospool_usage::query::{parse_date, Period};
use ospool_usage::search::Credentials;
use ospool_usage::utils::config::{DEFAULT_ES_URL, DEFAULT_LOOKBACK_DAYS, OSPOOL_ES_INDEX};

/// Exit status after a second interrupt
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// OSPool Usage - accounting fixtures from Elasticsearch and Topology
#[derive(Parser, Debug)]
#[command(name = "ospool-usage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Query accounting aggregates and write flat JSON rows
    Fetch {
        /// Exclusive end date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(short, long, value_parser = parse_date)]
        end: Option<chrono::NaiveDate>,

        /// Period to accumulate metrics over (day, month, quarter, year)
        #[arg(short, long, default_value = "day")]
        period: Period,

        /// Minimum number of days to look back
        #[arg(long = "lookback", default_value_t = DEFAULT_LOOKBACK_DAYS)]
        lookback_days: i64,

        /// Directory receiving the JSON output
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Also group by wall and wait time buckets
        #[arg(long)]
        compute_buckets: bool,

        /// Search backend URL
        #[arg(long, env = "ES_URL", default_value = DEFAULT_ES_URL)]
        es_url: String,

        /// Search backend user
        #[arg(long, env = "ES_USER")]
        es_user: Option<String>,

        /// Search backend password
        #[arg(long, env = "ES_PASSWORD", hide_env_values = true)]
        es_password: Option<String>,

        /// Index pattern to query
        #[arg(long, default_value = OSPOOL_ES_INDEX)]
        index: String,

        /// Directory holding the Topology caches (defaults to the output directory)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Additional access point to count as part of the OSPool (repeatable)
        #[arg(long = "extra-ap")]
        extra_aps: Vec<String>,
    },

    /// Export Topology compute entrypoints as resource fixtures
    Resources {
        /// Directory receiving resources.json and resource_specs.json
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Validate a row JSON file
    Validate {
        /// Path to row JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

/// Install the Ctrl-C handler
///
/// **Private** - the first interrupt asks the query loop to stop, the
/// second exits right away
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        warn!("Stop requested, writing partial results (Ctrl-C again to abort)");
    })
    .context("Failed to install Ctrl-C handler")?;

    Ok(stop)
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Fetch {
            end,
            period,
            lookback_days,
            output_dir,
            compute_buckets,
            es_url,
            es_user,
            es_password,
            index,
            cache_dir,
            extra_aps,
        } => {
            let credentials = es_user.map(|username| Credentials {
                username,
                password: es_password,
            });

            let args = FetchArgs {
                es_url,
                index,
                credentials,
                end: end.unwrap_or_else(|| chrono::Utc::now().date_naive()),
                period,
                lookback_days,
                cache_dir: cache_dir.unwrap_or_else(|| output_dir.clone()),
                output_dir,
                compute_buckets,
                extra_aps,
            };

            // Validate args first
            validate_args(&args)?;

            let stop = install_stop_handler()?;
            let outcome = execute_fetch(args, &stop)?;
            if !outcome.complete {
                warn!("Run was interrupted; {} is a partial result", outcome.path.display());
            }
        }

        Commands::Resources { output_dir } => {
            execute_resources(&output_dir)?;
        }

        Commands::Validate { file } => {
            validate_rows_file(file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
