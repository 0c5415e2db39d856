//! In-memory test doubles for the copy engine.
//!
//! [`MemoryDatabase`] backs the `memory` source and target connectors with
//! plain vectors of rows and lets tests inject connection, extraction and
//! load failures. [`ContendedStore`] wraps the in-memory watermark store and
//! simulates rival writers landing between a run's read and its
//! compare-and-set.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use sync_core::{
    next_batch, ConnectionConfig, Credentials, LoadRequest, ReadRequest, Result, Row, RowStream,
    SourceConnection, SourceConnector, SyncError, TargetConnection, TargetConnector, Value,
    Watermark, WriteMode,
};
use watermark::{CasOutcome, MemoryStore, StoredWatermark, WatermarkStore};

use crate::connect::ConnectorRegistry;

pub const ENGINE: &str = "memory";

#[derive(Debug, Default)]
struct Faults {
    connect: bool,
    /// Fail the next read after yielding this many rows.
    read_after: Option<usize>,
    load: bool,
}

/// Tables held in memory, serving as either side of a copy.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    faults: Mutex<Faults>,
    read_delay: Mutex<Option<Duration>>,
    source_connects: AtomicUsize,
    target_connects: AtomicUsize,
    open_connections: AtomicUsize,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_table(&self, table: &str, rows: Vec<Row>) {
        lock(&self.tables).insert(table.to_string(), rows);
    }

    pub fn insert(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.tables).contains_key(table)
    }

    /// Integer values of `column`, in stored order.
    pub fn column_ints(&self, table: &str, column: &str) -> Vec<i64> {
        self.rows(table)
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_i64))
            .collect()
    }

    /// The next `connect` on either side fails.
    pub fn fail_next_connect(&self) {
        lock(&self.faults).connect = true;
    }

    /// The next read fails after yielding `rows` rows.
    pub fn fail_next_read_after(&self, rows: usize) {
        lock(&self.faults).read_after = Some(rows);
    }

    /// The next load fails after consuming its whole input.
    pub fn fail_next_load(&self) {
        lock(&self.faults).load = true;
    }

    /// Delay every row of every read.
    pub fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = Some(delay);
    }

    pub fn source_connects(&self) -> usize {
        self.source_connects.load(AtomicOrdering::SeqCst)
    }

    pub fn target_connects(&self) -> usize {
        self.target_connects.load(AtomicOrdering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(AtomicOrdering::SeqCst)
    }

    fn open_connection(self: &Arc<Self>) -> MemoryConnection {
        self.open_connections.fetch_add(1, AtomicOrdering::SeqCst);
        MemoryConnection(Arc::clone(self))
    }

    fn take_connect_fault(&self) -> bool {
        std::mem::take(&mut lock(&self.faults).connect)
    }

    fn select(&self, request: &ReadRequest) -> Result<Vec<Row>> {
        let tables = lock(&self.tables);
        let rows = tables
            .get(&request.table)
            .ok_or_else(|| SyncError::extraction(&request.table, "no such table"))?;

        let mut selected: Vec<Row> = match &request.filter {
            Some(filter) => rows
                .iter()
                .filter(|row| {
                    row.get(&filter.column)
                        .and_then(|v| compare_values(v, &filter.value))
                        == Some(Ordering::Greater)
                })
                .cloned()
                .collect(),
            None => rows.clone(),
        };

        let order = request.sort_columns(&[]);
        if !order.is_empty() {
            selected.sort_by(|a, b| {
                order
                    .iter()
                    .map(|column| match (a.get(column), b.get(column)) {
                        (Some(x), Some(y)) => sort_order(x, y),
                        _ => Ordering::Equal,
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        Ok(selected)
    }
}

/// Registry serving the `memory` engine from `source` and into `target`.
pub fn memory_registry(source: &Arc<MemoryDatabase>, target: &Arc<MemoryDatabase>) -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::empty();
    registry.register_source(ENGINE, Arc::new(MemorySource(Arc::clone(source))));
    registry.register_target(ENGINE, Arc::new(MemoryTarget(Arc::clone(target))));
    registry
}

/// Source and target credentials both selecting the `memory` engine.
pub fn memory_credentials() -> Credentials {
    Credentials::new(
        ConnectionConfig::new(ENGINE, "source"),
        ConnectionConfig::new(ENGINE, "target"),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SQL-like comparison; NULLs and mismatched kinds do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    if let (Some(x), Some(y)) = (a.as_utc_timestamp(), b.as_utc_timestamp()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ascending order with NULLs first.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

struct MemorySource(Arc<MemoryDatabase>);

struct MemoryTarget(Arc<MemoryDatabase>);

struct MemoryConnection(Arc<MemoryDatabase>);

#[async_trait]
impl SourceConnector for MemorySource {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>> {
        self.0.source_connects.fetch_add(1, AtomicOrdering::SeqCst);
        if self.0.take_connect_fault() {
            return Err(SyncError::connection(ENGINE, "connection refused"));
        }
        Ok(Box::new(self.0.open_connection()))
    }
}

#[async_trait]
impl TargetConnector for MemoryTarget {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn TargetConnection>> {
        self.0.target_connects.fetch_add(1, AtomicOrdering::SeqCst);
        if self.0.take_connect_fault() {
            return Err(SyncError::connection(ENGINE, "connection refused"));
        }
        Ok(Box::new(self.0.open_connection()))
    }
}

#[async_trait]
impl SourceConnection for MemoryConnection {
    async fn read_rows(&mut self, request: &ReadRequest) -> Result<RowStream<'static>> {
        let rows = self.0.select(request)?;
        let fail_after = lock(&self.0.faults).read_after.take();
        let delay = *lock(&self.0.read_delay);

        let mut items: Vec<Result<Row>> = rows.into_iter().map(Ok).collect();
        if let Some(n) = fail_after {
            items.truncate(n);
            items.push(Err(SyncError::extraction(&request.table, "connection reset")));
        }

        let rows = stream::iter(items);
        Ok(match delay {
            Some(delay) => rows
                .then(move |row| async move {
                    tokio::time::sleep(delay).await;
                    row
                })
                .boxed(),
            None => rows.boxed(),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.0.open_connections.fetch_sub(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TargetConnection for MemoryConnection {
    async fn load_rows(&mut self, request: &LoadRequest, mut rows: RowStream<'_>) -> Result<u64> {
        let mut loaded = Vec::new();
        loop {
            let batch = next_batch(&mut rows, request.batch_size.max(1)).await?;
            if batch.is_empty() {
                break;
            }
            loaded.extend(batch);
        }

        if std::mem::take(&mut lock(&self.0.faults).load) {
            return Err(SyncError::load(&request.table, "disk full"));
        }

        let written = loaded.len() as u64;
        let mut tables = lock(&self.0.tables);
        match request.mode {
            WriteMode::Replace => {
                tables.insert(request.table.clone(), loaded);
            }
            WriteMode::Append => tables.entry(request.table.clone()).or_default().extend(loaded),
        }
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.0.open_connections.fetch_sub(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Watermark store whose next compare-and-sets lose to queued rival writes.
///
/// Each queued value is written straight into the inner store right before
/// a compare-and-set, which then reports a conflict.
#[derive(Debug, Default)]
pub struct ContendedStore {
    inner: MemoryStore,
    rivals: Mutex<VecDeque<Watermark>>,
    attempts: AtomicUsize,
}

impl ContendedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn push_rival(&self, value: Watermark) {
        lock(&self.rivals).push_back(value);
    }

    /// Number of compare-and-set calls seen, conflicts included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl WatermarkStore for ContendedStore {
    fn backend(&self) -> &'static str {
        "contended-memory"
    }

    async fn get(&self, table: &str) -> anyhow::Result<Option<StoredWatermark>> {
        self.inner.get(table).await
    }

    async fn compare_and_set(
        &self,
        table: &str,
        expected: Option<&Watermark>,
        new: &Watermark,
    ) -> anyhow::Result<CasOutcome> {
        self.attempts.fetch_add(1, AtomicOrdering::SeqCst);
        let rival = lock(&self.rivals).pop_front();
        if let Some(rival) = rival {
            self.inner.seed(table, rival);
            return Ok(CasOutcome::Conflict);
        }
        self.inner.compare_and_set(table, expected, new).await
    }
}

/// Rows `id = n` for every `n` in `ids`, with a payload column.
pub fn sequence_rows(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
    ids.into_iter()
        .map(|id| {
            Row::from_pairs([
                ("id", Value::Int(id)),
                ("payload", Value::from(format!("row-{id}"))),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sync_core::WatermarkFilter;

    #[tokio::test]
    async fn test_filtered_ordered_read() {
        let db = MemoryDatabase::new();
        db.create_table("orders", sequence_rows([3, 1, 5, 2]));
        let registry = memory_registry(&db, &db);
        let credentials = memory_credentials();

        let mut source = registry
            .source(ENGINE)
            .unwrap()
            .connect(&credentials.source)
            .await
            .unwrap();
        let mut request = ReadRequest::full("orders", 10);
        request.filter = Some(WatermarkFilter {
            column: "id".into(),
            value: Value::Int(1),
        });
        request.order_by = vec!["id".into()];

        let rows: Vec<Row> = source.read_rows(&request).await.unwrap().try_collect().await.unwrap();
        let ids: Vec<i64> = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![2, 3, 5]);
    }

    #[tokio::test]
    async fn test_injected_read_failure_is_one_shot() {
        let db = MemoryDatabase::new();
        db.create_table("orders", sequence_rows(1..=3));
        db.fail_next_read_after(1);
        let mut source = memory_registry(&db, &db)
            .source(ENGINE)
            .unwrap()
            .connect(&memory_credentials().source)
            .await
            .unwrap();

        let request = ReadRequest::full("orders", 10);
        let err = source
            .read_rows(&request)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction { .. }));

        let rows: Vec<Row> = source.read_rows(&request).await.unwrap().try_collect().await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_contended_store_reports_conflict_then_applies() {
        let store = ContendedStore::new();
        store.push_rival(Watermark::Integer(7));

        let outcome = store
            .compare_and_set("orders", None, &Watermark::Integer(5))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
        assert_eq!(store.inner().value("orders"), Some(Watermark::Integer(7)));

        let current = Watermark::Integer(7);
        let outcome = store
            .compare_and_set("orders", Some(&current), &Watermark::Integer(9))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);
        assert_eq!(store.attempts(), 2);
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&Value::Int(2), &Value::Int(1)), Some(Ordering::Greater));
        assert_eq!(compare_values(&Value::Null, &Value::Int(1)), None);
        assert_eq!(
            compare_values(&Value::Text("b".into()), &Value::Text("a".into())),
            Some(Ordering::Greater)
        );
    }
}
