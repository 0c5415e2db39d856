//! MySQL source connector.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Pool};
use sync_core::{
    ConnectionConfig, ReadRequest, Result, Row, RowStream, SourceConnection, SourceConnector,
    SyncError, TableName,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{client, query, value, ENGINE};

/// Reads tables out of a MySQL database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlSource;

#[async_trait]
impl SourceConnector for MySqlSource {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>> {
        let (pool, conn) = client::connect(config).await?;
        Ok(Box::new(MySqlSourceConnection { pool, conn }))
    }
}

/// Open MySQL source connection.
///
/// `conn` serves metadata lookups; every `read_rows` call streams on a
/// separate pooled connection owned by a producer task.
pub struct MySqlSourceConnection {
    pool: Pool,
    conn: Conn,
}

#[async_trait]
impl SourceConnection for MySqlSourceConnection {
    async fn read_rows(&mut self, request: &ReadRequest) -> Result<RowStream<'static>> {
        let table = TableName::parse(&request.table);

        let primary_key = if request.order_by.is_empty() || request.key_columns.is_some() {
            Vec::new()
        } else {
            query::primary_key_columns(&mut self.conn, &table)
                .await
                .map_err(|e| SyncError::extraction(&request.table, e))?
        };

        let sql = query::select_sql(request, &primary_key);
        let params = match &request.filter {
            Some(filter) => Params::Positional(vec![value::to_mysql(&filter.value)]),
            None => Params::Empty,
        };
        debug!("MySQL extraction query for {}: {}", request.table, sql);

        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SyncError::extraction(&request.table, e))?;

        let (tx, rx) = mpsc::channel(request.batch_size.max(1));
        let table_name = request.table.clone();
        tokio::spawn(async move {
            if let Err(e) = produce_rows(conn, sql, params, &table_name, &tx).await {
                // The consumer may already be gone; nothing else to report to.
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        client::disconnect(this.pool, this.conn).await
    }
}

/// Execute `sql` and forward converted rows to `tx` until the result set or
/// the receiver ends.
async fn produce_rows(
    mut conn: Conn,
    sql: String,
    params: Params,
    table: &str,
    tx: &mpsc::Sender<Result<Row>>,
) -> Result<()> {
    let mut stream = conn
        .exec_stream::<mysql_async::Row, _, _>(sql, params)
        .await
        .map_err(|e| SyncError::extraction(table, e))?;

    let mut column_names: Option<Arc<[String]>> = None;
    let mut count = 0u64;

    while let Some(row) = stream.next().await {
        let mut row = row.map_err(|e| SyncError::extraction(table, e))?;
        let columns = row.columns();

        let names = column_names
            .get_or_insert_with(|| columns.iter().map(|c| c.name_str().into_owned()).collect())
            .clone();

        let mut values = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let raw = row.take(i).unwrap_or(mysql_async::Value::NULL);
            let converted = value::from_mysql(raw, column.column_type(), column.character_set())
                .map_err(|e| {
                    SyncError::extraction(table, format!("column '{}': {e}", column.name_str()))
                })?;
            values.push(converted);
        }

        if tx.send(Ok(Row::new(names, values))).await.is_err() {
            warn!("Consumer of {} stopped after {} rows", table, count);
            return Ok(());
        }
        count += 1;
    }

    debug!("Extracted {} rows from {}", count, table);
    Ok(())
}
