//! Command-line interface for table-sync
//!
//! # Usage Examples
//!
//! ## Copy Tables
//! ```bash
//! # Every table of the catalog
//! table-sync run \
//!   --config table-sync.toml --env dev \
//!   --catalog tables.csv
//!
//! # Selected tables, more parallelism
//! table-sync run \
//!   --config table-sync.toml --env dev \
//!   --catalog tables.yaml \
//!   --tables orders,order_items --concurrency 8
//! ```
//!
//! After a run, one `NEW_WATERMARK_<TABLE>=<value>` line is printed on
//! stdout for every table with a stored watermark, for the scheduler to pick
//! up. The process exits with status 1 when any table failed.
//!
//! ## Inspect
//! ```bash
//! # Validate and print a catalog
//! table-sync catalog --catalog tables.csv
//!
//! # Show stored watermarks
//! table-sync watermark --config table-sync.toml --env dev --table orders
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sync_core::CopyStatus;
use table_sync::{
    watermark_env_line, Catalog, Config, ConnectorRegistry, CopyEngine, ParallelRunner,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "table-sync")]
#[command(about = "Copy tables between relational databases, in full or incrementally")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the selected catalog tables from source to target
    Run {
        /// TOML configuration file
        #[arg(long, env = "TABLE_SYNC_CONFIG")]
        config: PathBuf,

        /// Environment section of the configuration
        #[arg(long, env = "TABLE_SYNC_ENV", default_value = "dev")]
        env: String,

        /// Table catalog (.csv, .yaml or .yml)
        #[arg(long, env = "TABLE_SYNC_CATALOG")]
        catalog: PathBuf,

        /// `all` or a comma-separated list of table names
        #[arg(long, default_value = "all")]
        tables: String,

        /// Table groups copied at the same time (overrides the config file)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Rows per fetch and per insert (overrides the config file)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Validate a catalog and print its tables
    Catalog {
        /// Table catalog (.csv, .yaml or .yml)
        #[arg(long, env = "TABLE_SYNC_CATALOG")]
        catalog: PathBuf,
    },

    /// Show stored watermarks
    Watermark {
        /// TOML configuration file
        #[arg(long, env = "TABLE_SYNC_CONFIG")]
        config: PathBuf,

        /// Environment section of the configuration
        #[arg(long, env = "TABLE_SYNC_ENV", default_value = "dev")]
        env: String,

        /// Tables to show (repeatable)
        #[arg(long = "table", value_name = "TABLE")]
        tables: Vec<String>,

        /// Show every incremental table of this catalog
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match run().await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when any table failed.
async fn run() -> anyhow::Result<bool> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            env,
            catalog,
            tables,
            concurrency,
            batch_size,
        } => run_copy(config, env, catalog, tables, concurrency, batch_size).await,
        Commands::Catalog { catalog } => {
            print_catalog(catalog)?;
            Ok(true)
        }
        Commands::Watermark {
            config,
            env,
            tables,
            catalog,
        } => {
            show_watermarks(config, env, tables, catalog).await?;
            Ok(true)
        }
    }
}

async fn run_copy(
    config_path: PathBuf,
    env: String,
    catalog_path: PathBuf,
    selection: String,
    concurrency: Option<usize>,
    batch_size: Option<usize>,
) -> anyhow::Result<bool> {
    let mut config = Config::from_file(&config_path)?;
    if let Some(concurrency) = concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be greater than zero");
        config.concurrency = concurrency;
    }
    if let Some(batch_size) = batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be greater than zero");
        config.batch_size = batch_size;
    }
    let environment = config.environment(&env)?;

    let catalog = Catalog::from_file(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
    let tables = catalog.select(&selection);
    if tables.is_empty() {
        warn!("No tables selected by '{}'", selection);
        return Ok(true);
    }

    let credentials = environment.credentials();
    info!(
        "Copying {} tables from {} to {}",
        tables.len(),
        credentials.source,
        credentials.target
    );

    let store = environment.watermarks.open().await?;
    let engine = CopyEngine::new(
        ConnectorRegistry::with_defaults(),
        store,
        config.engine_options(),
    );
    let runner = ParallelRunner::new(engine, config.concurrency);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling unfinished tables");
            cancel.cancel();
        }
    });

    let results = runner.run(&tables, &credentials).await;

    let mut failed = 0;
    for result in &results {
        match result.status {
            CopyStatus::Success => info!(
                "{}: {} rows ({}) in {:?}",
                result.table_name, result.rows_copied, result.mode, result.elapsed
            ),
            CopyStatus::Skipped => info!("{}: skipped (disabled)", result.table_name),
            CopyStatus::Failure => {
                failed += 1;
                if let Some(failure) = &result.failure {
                    warn!(
                        "{}: failed during {} ({}{}): {}",
                        result.table_name,
                        failure.state,
                        failure.kind,
                        if failure.retryable { ", retryable" } else { "" },
                        failure.message
                    );
                }
            }
        }
        if let Some(watermark) = &result.new_watermark {
            println!("{}", watermark_env_line(&result.table_name, watermark));
        }
    }

    info!(
        "Finished: {} succeeded, {} failed, {} skipped",
        results.iter().filter(|r| r.is_success()).count(),
        failed,
        results.iter().filter(|r| r.status == CopyStatus::Skipped).count()
    );
    Ok(failed == 0)
}

fn print_catalog(catalog_path: PathBuf) -> anyhow::Result<()> {
    let catalog = Catalog::from_file(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
    for table in catalog.tables() {
        let watermark = match table.watermark() {
            Some((column, ty)) => format!("{column} ({ty})"),
            None => "-".to_string(),
        };
        println!(
            "{}\t{}\t{}\t{}",
            table.name,
            if table.enabled { "enabled" } else { "disabled" },
            table.load_mode,
            watermark
        );
    }
    Ok(())
}

async fn show_watermarks(
    config_path: PathBuf,
    env: String,
    mut tables: Vec<String>,
    catalog_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::from_file(&config_path)?;
    let environment = config.environment(&env)?;

    if let Some(path) = catalog_path {
        let catalog = Catalog::from_file(&path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?;
        tables.extend(
            catalog
                .tables()
                .iter()
                .filter(|t| t.watermark().is_some())
                .map(|t| t.name.clone()),
        );
    }
    anyhow::ensure!(!tables.is_empty(), "Pass --table or --catalog");

    let store = environment.watermarks.open().await?;
    for table in &tables {
        match store.get(table).await? {
            Some(record) => println!(
                "{}\t{}\t{}\t{}",
                table,
                record.value.watermark_type(),
                record.value,
                record.updated_at.to_rfc3339()
            ),
            None => println!("{table}\tnever ran"),
        }
    }
    Ok(())
}
