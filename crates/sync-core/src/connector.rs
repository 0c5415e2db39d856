//! Connector capability traits.
//!
//! Every supported database implements [`SourceConnector`] and/or
//! [`TargetConnector`]. The copy engine only ever talks to these traits, so a
//! new engine is added by implementing them and registering the connector;
//! the engine itself does not change.
//!
//! Connectors are factories: `connect` validates the credentials and returns
//! a connection object that owns the driver resources for one table run.

use crate::credentials::ConnectionConfig;
use crate::error::Result;
use crate::values::{Row, Value};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// A lazy, finite stream of rows.
///
/// Errors produced by a source are [`crate::SyncError::Extraction`]; target
/// connectors must propagate them unchanged.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Maximum number of bind parameters in one statement, shared by MySQL and
/// PostgreSQL.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// How a target table receives the loaded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Atomically swap the table contents for the loaded rows.
    Replace,
    /// Insert the loaded rows next to the existing ones. No dedup.
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Replace => "replace",
            WriteMode::Append => "append",
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate `column > value`, rendered in the connector's own dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkFilter {
    pub column: String,
    pub value: Value,
}

/// What to extract from a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub table: String,
    pub filter: Option<WatermarkFilter>,
    /// Ascending sort columns, normally the watermark column. Empty means
    /// unordered.
    pub order_by: Vec<String>,
    /// Explicit tie-break key appended after `order_by`. `None` lets the
    /// connector use the table's primary key.
    pub key_columns: Option<Vec<String>>,
    /// Rows fetched per round trip and buffered between producer and consumer.
    pub batch_size: usize,
}

impl ReadRequest {
    /// Unfiltered, unordered read of the whole table.
    pub fn full(table: impl Into<String>, batch_size: usize) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            key_columns: None,
            batch_size,
        }
    }

    /// Order columns including the tie-break key, without duplicates.
    pub fn sort_columns(&self, primary_key: &[String]) -> Vec<String> {
        if self.order_by.is_empty() {
            return Vec::new();
        }
        let key = self.key_columns.as_deref().unwrap_or(primary_key);
        let mut columns = self.order_by.clone();
        for column in key {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }
}

/// Where and how to load rows into a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub table: String,
    pub mode: WriteMode,
    /// Maximum rows per insert statement.
    pub batch_size: usize,
}

/// Capability set of a source database.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Engine type this connector is registered under.
    fn engine(&self) -> &'static str;

    /// Open a connection. Fails with `Connection` on an unreachable host,
    /// an authentication failure or an unknown database.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>>;
}

/// An open source connection.
#[async_trait]
pub trait SourceConnection: Send {
    /// Start a new query and stream its rows. Each call is independent.
    async fn read_rows(&mut self, request: &ReadRequest) -> Result<RowStream<'static>>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Capability set of a target database.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Engine type this connector is registered under.
    fn engine(&self) -> &'static str;

    /// Open a connection.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn TargetConnection>>;
}

/// An open target connection.
#[async_trait]
pub trait TargetConnection: Send {
    /// Consume `rows` and write them to `request.table`. Returns the number
    /// of rows written.
    ///
    /// `Replace` must never expose a half-replaced table; on failure the
    /// table keeps its previous contents.
    async fn load_rows(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Pull up to `max` rows off `rows`. An empty batch means the stream ended.
pub async fn next_batch(rows: &mut RowStream<'_>, max: usize) -> Result<Vec<Row>> {
    let mut batch = Vec::with_capacity(max.min(1024));
    while batch.len() < max {
        match rows.next().await {
            Some(row) => batch.push(row?),
            None => break,
        }
    }
    Ok(batch)
}

/// Rows per multi-row INSERT so that `columns * rows` stays within
/// [`MAX_BIND_PARAMS`].
pub fn rows_per_statement(columns: usize, batch_size: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / columns.max(1);
    batch_size.clamp(1, by_params.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use futures::stream;

    fn rows(n: i64) -> Vec<Result<Row>> {
        (1..=n)
            .map(|i| Ok(Row::from_pairs([("id", Value::Int(i))])))
            .collect()
    }

    #[tokio::test]
    async fn test_next_batch_splits_stream() {
        let mut stream: RowStream<'_> = stream::iter(rows(5)).boxed();
        assert_eq!(next_batch(&mut stream, 2).await.unwrap().len(), 2);
        assert_eq!(next_batch(&mut stream, 2).await.unwrap().len(), 2);
        assert_eq!(next_batch(&mut stream, 2).await.unwrap().len(), 1);
        assert!(next_batch(&mut stream, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_batch_propagates_source_errors() {
        let items = vec![
            Ok(Row::from_pairs([("id", Value::Int(1))])),
            Err(SyncError::extraction("orders", "connection reset")),
        ];
        let mut stream: RowStream<'_> = stream::iter(items).boxed();
        let err = next_batch(&mut stream, 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Extraction { .. }));
    }

    #[test]
    fn test_rows_per_statement_respects_param_limit() {
        assert_eq!(rows_per_statement(4, 1000), 1000);
        assert_eq!(rows_per_statement(100, 1000), 655);
        assert_eq!(rows_per_statement(0, 10), 10);
        assert_eq!(rows_per_statement(3, 0), 1);
    }

    #[test]
    fn test_sort_columns_appends_key_once() {
        let mut request = ReadRequest::full("orders", 100);
        assert!(request.sort_columns(&["id".into()]).is_empty());

        request.order_by = vec!["updated_at".into()];
        assert_eq!(
            request.sort_columns(&["id".into()]),
            vec!["updated_at".to_string(), "id".to_string()]
        );

        request.order_by = vec!["order_id".into()];
        assert_eq!(request.sort_columns(&["order_id".into()]), vec!["order_id".to_string()]);

        request.key_columns = Some(vec!["region".into(), "seq".into()]);
        assert_eq!(
            request.sort_columns(&["id".into()]),
            vec!["order_id".to_string(), "region".to_string(), "seq".to_string()]
        );
    }
}
