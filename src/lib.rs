//! TableSync Library
//!
//! Copies tables from a relational source to a relational target, either as
//! a full refresh or incrementally above a stored watermark.
//!
//! # Features
//!
//! - Full loads: the target table is atomically replaced by the source rows
//! - Incremental loads: only rows with `watermark_column > stored` are
//!   appended, and the watermark only advances after the load committed
//! - Compare-and-set watermark storage (memory, filesystem, PostgreSQL)
//! - Table groups copied concurrently
//!
//! # Connector Crates
//!
//! - `table_sync_mysql` - MySQL source and target
//! - `table_sync_postgresql` - PostgreSQL source and target
//! - `table_sync_csv` - CSV file target
//!
//! # CLI Usage
//!
//! ```bash
//! # Copy every enabled table of the catalog
//! table-sync run --config table-sync.toml --env dev --catalog tables.csv
//!
//! # Copy two tables only
//! table-sync run --config table-sync.toml --env dev --catalog tables.csv --tables orders,customers
//!
//! # Show stored watermarks
//! table-sync watermark --config table-sync.toml --env dev --table orders
//! ```

pub mod catalog;
pub mod config;
pub mod connect;
pub mod engine;
pub mod runner;
pub mod testing;

pub use catalog::{Catalog, CatalogError};
pub use config::{Config, EnvironmentConfig, WatermarkSection};
pub use connect::ConnectorRegistry;
pub use engine::{CopyEngine, EngineOptions, TableLocks, TrackerError, WatermarkTracker};
pub use runner::{plan_groups, ParallelRunner, TableGroup};

/// Scheduler hand-off line for a table's watermark:
/// `NEW_WATERMARK_<TABLE>=<value>`, with non-alphanumeric characters of the
/// table name replaced by `_`.
pub fn watermark_env_line(table: &str, value: &sync_core::Watermark) -> String {
    let key: String = table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("NEW_WATERMARK_{key}={}", value.encode())
}
