//! CSV file target for table-sync
//!
//! Dumps each table to `<dir>/<table>.csv`, where `<dir>` is the `database`
//! of the target connection parameters. CSV is target-only.

mod target;

pub use target::{CsvTarget, CsvTargetConnection};

/// Engine type the connector is registered under.
pub const ENGINE: &str = "csv";
