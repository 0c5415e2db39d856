//! Watermark storage for table-sync
//!
//! Persists the per-table watermark, the highest watermark-column value known
//! to be copied, across runs.
//!
//! # Architecture
//!
//! - `WatermarkStore` is the backend-agnostic trait the copy engine uses
//! - Writes are conditional (`compare_and_set`), never blind overwrites
//! - A missing record means the table has never completed a run
//!
//! ## Storage Backends
//!
//! - `MemoryStore` - Process-local map, for tests
//! - `FilesystemStore` - One JSON file per table
//! - `PostgresStore` - One row per table in a PostgreSQL table

mod filesystem;
mod memory;
mod postgresql;
pub mod store;


// Re-export store trait and types
pub use store::{CasOutcome, StoredWatermark, WatermarkStore};

// Re-export storage implementations
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use postgresql::{PostgresStore, DEFAULT_TABLE};
