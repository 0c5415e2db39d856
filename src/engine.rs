//! Per-table copy engine.
//!
//! A table run walks through
//!
//! ```text
//! Init -> ModeResolved -> Extracting -> Loading -> WatermarkCommitted
//!   \_____________\______________\___________\____> Failed
//! ```
//!
//! - **ModeResolved**: a full-mode table, or an incremental table without a
//!   stored watermark, is loaded in full and replaces the target table.
//!   Otherwise only rows with `watermark_column > stored` are read and
//!   appended.
//! - **Extracting**: rows stream from the source ordered by the watermark
//!   column. The highest watermark seen is tracked on the fly.
//! - **Loading**: rows stream into the target. An empty incremental delta
//!   is a no-op and never opens the target; an empty full load still
//!   replaces the target with zero rows.
//! - **WatermarkCommitted**: the store is advanced to
//!   `max(stored, observed)` with a compare-and-set against the value read
//!   during mode resolution, retried on conflict.
//!
//! Any error leaves the stored watermark as it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::{stream, StreamExt};
use sync_core::{
    CopyResult, CopyState, Credentials, LoadMode, LoadRequest, ReadRequest, Result, Row,
    RowStream, SourceConnection, SyncError, TableConfig, TargetConnector, Watermark,
    WatermarkFilter, WatermarkType, WatermarkValueError, WriteMode,
};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use watermark::{CasOutcome, WatermarkStore};

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WATERMARK_RETRIES};
use crate::connect::ConnectorRegistry;

/// Tunables shared by every table run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Rows per fetch and per insert statement.
    pub batch_size: usize,
    /// Compare-and-set attempts before giving up with `WatermarkConflict`.
    pub max_watermark_retries: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_watermark_retries: DEFAULT_MAX_WATERMARK_RETRIES,
        }
    }
}

/// In-process mutual exclusion per table name.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run of `table` holds the lock.
    pub async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(table.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// A row the tracker could not fold into the maximum.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("watermark column '{0}' is not in the result set")]
    MissingColumn(String),

    #[error(transparent)]
    Value(#[from] WatermarkValueError),
}

/// Running maximum of a watermark column.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    column: String,
    watermark_type: WatermarkType,
    max: Option<Watermark>,
}

impl WatermarkTracker {
    pub fn new(column: impl Into<String>, watermark_type: WatermarkType) -> Self {
        Self {
            column: column.into(),
            watermark_type,
            max: None,
        }
    }

    /// Fold one row into the maximum. NULL watermarks are ignored.
    pub fn observe(&mut self, row: &Row) -> std::result::Result<(), TrackerError> {
        let value = row
            .get(&self.column)
            .ok_or_else(|| TrackerError::MissingColumn(self.column.clone()))?;
        let Some(watermark) = Watermark::from_value(value, self.watermark_type)? else {
            return Ok(());
        };
        let is_new_max = match &self.max {
            Some(max) => watermark > *max,
            None => true,
        };
        if is_new_max {
            self.max = Some(watermark);
        }
        Ok(())
    }

    pub fn max(&self) -> Option<&Watermark> {
        self.max.as_ref()
    }

    pub fn into_max(self) -> Option<Watermark> {
        self.max
    }
}

/// Copies single tables from the source to the target database.
///
/// Safe to share between tasks: runs of different tables proceed in
/// parallel, runs of the same table are serialized.
#[derive(Clone)]
pub struct CopyEngine {
    registry: ConnectorRegistry,
    store: Arc<dyn WatermarkStore>,
    options: EngineOptions,
    locks: TableLocks,
}

impl CopyEngine {
    pub fn new(
        registry: ConnectorRegistry,
        store: Arc<dyn WatermarkStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            store,
            options,
            locks: TableLocks::new(),
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<dyn WatermarkStore> {
        &self.store
    }

    /// Copy one table.
    pub async fn run_table(&self, config: &TableConfig, credentials: &Credentials) -> CopyResult {
        self.run_table_until(config, credentials, &CancellationToken::new())
            .await
    }

    /// Copy tables one after another. Results are in input order and a
    /// failing table does not stop the ones after it.
    pub async fn run_tables(
        &self,
        configs: &[TableConfig],
        credentials: &Credentials,
    ) -> Vec<CopyResult> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            results.push(self.run_table(config, credentials).await);
        }
        results
    }

    /// Copy one table, giving up with `Cancelled` once `cancel` fires.
    pub async fn run_table_until(
        &self,
        config: &TableConfig,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> CopyResult {
        let started = Instant::now();
        let table = config.name.as_str();

        if !config.enabled {
            info!("Skipping disabled table {}", table);
            return CopyResult::skipped(table, config.load_mode);
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let err = SyncError::Cancelled { table: table.to_string() };
                return CopyResult::failure(table, config.load_mode, CopyState::Init, &err, started.elapsed());
            }
            guard = self.locks.acquire(table) => guard,
        };

        let mut run = TableRun {
            engine: self,
            config,
            credentials,
            state: CopyState::Init,
            mode: config.load_mode,
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled { table: table.to_string() }),
            outcome = run.execute() => outcome,
        };

        match outcome {
            Ok((rows_copied, new_watermark)) => {
                info!(
                    table,
                    mode = %run.mode,
                    rows = rows_copied,
                    watermark = %new_watermark.as_ref().map(|w| w.encode()).unwrap_or_default(),
                    "Copied table in {:?}",
                    started.elapsed()
                );
                CopyResult::success(table, run.mode, rows_copied, new_watermark, started.elapsed())
            }
            Err(e) => {
                let failed_in = run.state;
                run.enter(CopyState::Failed);
                warn!(table, state = %failed_in, "Copy failed: {}", e);
                CopyResult::failure(table, run.mode, failed_in, &e, started.elapsed())
            }
        }
    }

    /// Stored watermark of `table`, checked against its declared type.
    async fn read_watermark(&self, table: &str, declared: WatermarkType) -> Result<Option<Watermark>> {
        let record = self
            .store
            .get(table)
            .await
            .map_err(|e| SyncError::watermark_store(table, format!("{e:#}")))?;
        match record {
            Some(record) if record.value.watermark_type() != declared => {
                Err(SyncError::watermark_store(
                    table,
                    format!(
                        "stored watermark {} is a {} but the table declares {}",
                        record.value,
                        record.value.watermark_type(),
                        declared
                    ),
                ))
            }
            Some(record) => Ok(Some(record.value)),
            None => Ok(None),
        }
    }

    /// Advance the stored watermark to `max(stored, observed)`.
    async fn commit_watermark(
        &self,
        table: &str,
        declared: WatermarkType,
        mut expected: Option<Watermark>,
        observed: Watermark,
    ) -> Result<Watermark> {
        let mut attempts = 0;
        loop {
            if let Some(current) = &expected {
                if *current >= observed {
                    debug!(table, "Stored watermark {} already covers {}", current, observed);
                    return Ok(current.clone());
                }
            }
            if attempts == self.options.max_watermark_retries {
                return Err(SyncError::WatermarkConflict {
                    table: table.to_string(),
                    attempts,
                });
            }
            attempts += 1;

            let outcome = self
                .store
                .compare_and_set(table, expected.as_ref(), &observed)
                .await
                .map_err(|e| SyncError::watermark_store(table, format!("{e:#}")))?;
            match outcome {
                CasOutcome::Applied => {
                    debug!(
                        table,
                        "Watermark advanced from {} to {}",
                        expected.as_ref().map(|w| w.encode()).unwrap_or_else(|| "none".into()),
                        observed
                    );
                    return Ok(observed);
                }
                CasOutcome::Conflict => {
                    warn!(table, attempt = attempts, "Watermark changed concurrently, re-reading");
                    expected = self.read_watermark(table, declared).await?;
                }
            }
        }
    }
}

impl std::fmt::Debug for CopyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyEngine")
            .field("registry", &self.registry)
            .field("store", &self.store.backend())
            .field("options", &self.options)
            .finish()
    }
}

/// State of one table run.
struct TableRun<'a> {
    engine: &'a CopyEngine,
    config: &'a TableConfig,
    credentials: &'a Credentials,
    state: CopyState,
    /// Effective mode once resolved.
    mode: LoadMode,
}

impl TableRun<'_> {
    fn enter(&mut self, state: CopyState) {
        debug!(table = %self.config.name, from = %self.state, to = %state, "State transition");
        self.state = state;
    }

    async fn execute(&mut self) -> Result<(u64, Option<Watermark>)> {
        let engine = self.engine;
        let config = self.config;
        let table = config.name.as_str();

        let source_connector = engine.registry.source(&self.credentials.source.engine)?;
        let target_connector = engine.registry.target(&self.credentials.target.engine)?;

        let tracking = match config.load_mode {
            LoadMode::Incremental => config.watermark(),
            LoadMode::Full => None,
        };
        let stored = match tracking {
            Some((_, ty)) => engine.read_watermark(table, ty).await?,
            None => None,
        };

        let mut request = ReadRequest::full(table, engine.options.batch_size);
        if let Some(column) = &config.watermark_column {
            request.order_by = vec![column.clone()];
        }
        if !config.key_columns.is_empty() {
            request.key_columns = Some(config.key_columns.clone());
        }
        let write_mode = match (&tracking, &stored) {
            (Some((column, _)), Some(stored)) => {
                request.filter = Some(WatermarkFilter {
                    column: column.to_string(),
                    value: stored.to_value(),
                });
                self.mode = LoadMode::Incremental;
                WriteMode::Append
            }
            _ => {
                self.mode = LoadMode::Full;
                WriteMode::Replace
            }
        };
        self.enter(CopyState::ModeResolved);
        info!(
            table,
            mode = %self.mode,
            watermark = %stored.as_ref().map(|w| w.encode()).unwrap_or_default(),
            "Starting copy"
        );

        self.enter(CopyState::Extracting);
        let mut source = source_connector.connect(&self.credentials.source).await?;
        let mut tracker = tracking.map(|(column, ty)| WatermarkTracker::new(column, ty));
        let transferred = self
            .transfer(
                source.as_mut(),
                target_connector.as_ref(),
                &request,
                write_mode,
                tracker.as_mut(),
            )
            .await;
        close_quietly(table, "source", source.close().await);
        let rows_copied = transferred?;

        let new_watermark = match (tracking, tracker.and_then(WatermarkTracker::into_max)) {
            (Some((_, ty)), Some(max)) => {
                Some(engine.commit_watermark(table, ty, stored, max).await?)
            }
            // Nothing observed: no rows, or every watermark was NULL
            (Some(_), None) => stored,
            (None, _) => None,
        };
        self.enter(CopyState::WatermarkCommitted);

        Ok((rows_copied, new_watermark))
    }

    /// Stream the rows of `request` into the target, folding each row into
    /// `tracker`. An empty append delta never opens the target; an empty
    /// replace still empties it.
    async fn transfer(
        &mut self,
        source: &mut dyn SourceConnection,
        target_connector: &dyn TargetConnector,
        request: &ReadRequest,
        write_mode: WriteMode,
        mut tracker: Option<&mut WatermarkTracker>,
    ) -> Result<u64> {
        let config: &TableConfig = self.config;
        let table = config.name.as_str();
        let mut rows = source.read_rows(request).await?;

        let first = match rows.next().await {
            Some(first) => Some(first?),
            None => None,
        };
        if first.is_none() {
            if write_mode == WriteMode::Append {
                info!(table, "No rows above the watermark, nothing to load");
                return Ok(0);
            }
            info!(table, "Source table is empty, clearing the target");
        }

        let observed: RowStream<'_> = stream::iter(first.map(Ok))
            .chain(rows)
            .map(move |item: Result<Row>| -> Result<Row> {
                let row = item?;
                if let Some(tracker) = tracker.as_deref_mut() {
                    tracker
                        .observe(&row)
                        .map_err(|e| SyncError::extraction(table, e))?;
                }
                Ok(row)
            })
            .boxed();

        self.enter(CopyState::Loading);
        let mut target = target_connector.connect(&self.credentials.target).await?;
        let load = LoadRequest {
            table: table.to_string(),
            mode: write_mode,
            batch_size: self.engine.options.batch_size,
        };
        let written = target.load_rows(&load, observed).await;
        close_quietly(table, "target", target.close().await);
        written
    }
}

fn close_quietly(table: &str, side: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(table, "Failed to close {} connection: {}", side, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::Value;

    #[test]
    fn test_tracker_keeps_maximum_and_skips_nulls() {
        let mut tracker = WatermarkTracker::new("id", WatermarkType::IntegerSequence);
        for v in [Value::Int(3), Value::Null, Value::Int(9), Value::Int(4)] {
            tracker.observe(&Row::from_pairs([("id", v)])).unwrap();
        }
        assert_eq!(tracker.max(), Some(&Watermark::Integer(9)));
    }

    #[test]
    fn test_tracker_rejects_unreadable_values() {
        let mut tracker = WatermarkTracker::new("updated_at", WatermarkType::Timestamp);
        let err = tracker
            .observe(&Row::from_pairs([("updated_at", Value::Bool(true))]))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Value(_)));
        assert!(err.to_string().contains("timestamp watermark"));

        let err = tracker
            .observe(&Row::from_pairs([("id", Value::Int(1))]))
            .unwrap_err();
        assert!(matches!(err, TrackerError::MissingColumn(ref column) if column == "updated_at"));
    }

    #[tokio::test]
    async fn test_table_locks_serialize_same_table() {
        let locks = TableLocks::new();
        let guard = locks.acquire("orders").await;

        // Other tables are independent
        let other = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire("customers")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire("orders")).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire("orders")).await;
        assert!(same.is_ok());
    }
}
