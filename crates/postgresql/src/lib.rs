//! PostgreSQL connectors for table-sync
//!
//! Provides [`PostgresSource`] and [`PostgresTarget`], registered under the
//! `postgresql` engine type.

pub mod client;
pub mod query;
mod source;
mod target;
pub mod value;

pub use source::{PostgresSource, PostgresSourceConnection};
pub use target::{PostgresTarget, PostgresTargetConnection};

/// Engine type the connectors are registered under.
pub const ENGINE: &str = "postgresql";
