//! Core types for the table-sync framework.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`Row`] / [`Value`] - engine-agnostic rows produced by sources and
//!   consumed by targets
//! - [`TableConfig`] - immutable per-table declaration from the catalog
//! - [`Watermark`] - comparable high-water mark of an incremental table
//! - [`SourceConnector`] / [`TargetConnector`] - connector capability traits
//! - [`SyncError`] - error kinds of a table run
//! - [`CopyResult`] - outcome of one table run
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── watermark              (watermark stores)
//!    ├─── table-sync-mysql       (MySQL source + target)
//!    ├─── table-sync-postgresql  (PostgreSQL source + target)
//!    └─── table-sync-csv         (CSV file target)
//! ```

pub mod connector;
pub mod credentials;
pub mod error;
pub mod result;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use connector::{
    next_batch, rows_per_statement, LoadRequest, ReadRequest, RowStream, SourceConnection,
    SourceConnector, TargetConnection, TargetConnector, WatermarkFilter, WriteMode,
};
pub use credentials::{ConnectionConfig, Credentials};
pub use error::{ErrorKind, Result, SyncError};
pub use result::{CopyFailure, CopyResult, CopyState, CopyStatus};
pub use types::{
    LoadMode, ParseEnumError, TableConfig, TableName, Watermark, WatermarkType,
    WatermarkValueError,
};
pub use values::{Row, Value};
