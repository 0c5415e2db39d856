//! In-memory watermark storage.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use sync_core::Watermark;

use crate::store::{matches_expected, CasOutcome, StoredWatermark, WatermarkStore};

/// Process-local implementation of WatermarkStore trait.
///
/// Used by tests and dry runs; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredWatermark>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally set a watermark. Meant for seeding test fixtures.
    pub fn seed(&self, table: &str, value: Watermark) {
        self.lock()
            .insert(table.to_string(), StoredWatermark::new(table, value));
    }

    /// Current value of `table` without going through the async trait.
    pub fn value(&self, table: &str) -> Option<Watermark> {
        self.lock().get(table).map(|r| r.value.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredWatermark>> {
        // A poisoned map is still consistent: every mutation is a single insert.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>> {
        Ok(self.lock().get(table).cloned())
    }

    async fn compare_and_set(
        &self,
        table: &str,
        expected: Option<&Watermark>,
        new: &Watermark,
    ) -> Result<CasOutcome> {
        let mut records = self.lock();
        if !matches_expected(records.get(table), expected) {
            return Ok(CasOutcome::Conflict);
        }
        records.insert(
            table.to_string(),
            StoredWatermark::new(table, new.clone()),
        );
        Ok(CasOutcome::Applied)
    }
}
