//! Watermark storage trait and types
//!
//! This module defines the WatermarkStore trait for backend-agnostic
//! watermark storage operations, plus shared types.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::Watermark;

/// Watermark record as kept by a storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWatermark {
    /// Table the watermark belongs to
    pub table_name: String,
    /// Last committed watermark value
    pub value: Watermark,
    /// When the value was last advanced
    pub updated_at: DateTime<Utc>,
}

impl StoredWatermark {
    pub fn new(table_name: impl Into<String>, value: Watermark) -> Self {
        Self {
            table_name: table_name.into(),
            value,
            updated_at: Utc::now(),
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched the expected one and was replaced.
    Applied,
    /// The stored value changed since it was read; nothing was written.
    Conflict,
}

/// Trait for watermark storage operations.
///
/// This trait abstracts the storage backend, allowing the same copy logic to
/// work with:
/// - In-memory storage (`MemoryStore`)
/// - Filesystem storage (`FilesystemStore`)
/// - A PostgreSQL table (`PostgresStore`)
///
/// Absence of a record means the table has never completed a run.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Read the watermark of `table`, or `None` if it never ran.
    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>>;

    /// Write `new` only if the stored value still equals `expected`.
    ///
    /// `expected = None` succeeds only if no record exists yet. Never a blind
    /// overwrite.
    async fn compare_and_set(
        &self,
        table: &str,
        expected: Option<&Watermark>,
        new: &Watermark,
    ) -> Result<CasOutcome>;
}

/// Whether a stored record satisfies the `expected` precondition.
pub(crate) fn matches_expected(
    current: Option<&StoredWatermark>,
    expected: Option<&Watermark>,
) -> bool {
    match (current, expected) {
        (None, None) => true,
        (Some(current), Some(expected)) => current.value == *expected,
        _ => false,
    }
}
