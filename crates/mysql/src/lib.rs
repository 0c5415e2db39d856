//! MySQL connectors for table-sync
//!
//! Provides [`MySqlSource`] and [`MySqlTarget`], registered under the
//! `mysql` engine type.
//!
//! Rows are read with the binary protocol and streamed through a bounded
//! channel, so memory stays proportional to the batch size regardless of the
//! table size.

pub mod client;
pub mod query;
mod source;
mod target;
pub mod value;

pub use source::{MySqlSource, MySqlSourceConnection};
pub use target::{MySqlTarget, MySqlTargetConnection};

/// Engine type the connectors are registered under.
pub const ENGINE: &str = "mysql";
