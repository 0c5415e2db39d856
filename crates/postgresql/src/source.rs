//! PostgreSQL source connector.
//!
//! Rows are fetched through a portal inside a read transaction,
//! `batch_size` rows per round trip, and handed to the consumer over a
//! bounded channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sync_core::{
    ConnectionConfig, ReadRequest, Result, Row, RowStream, SourceConnection, SourceConnector,
    SyncError, TableName,
};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{client, query, value, ENGINE};

/// Reads tables out of a PostgreSQL database.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresSource;

#[async_trait]
impl SourceConnector for PostgresSource {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>> {
        let client = client::connect(config).await?;
        Ok(Box::new(PostgresSourceConnection {
            client: Arc::new(Mutex::new(client)),
        }))
    }
}

/// Open PostgreSQL source connection.
///
/// The client is shared with the producer task of the current read; a new
/// read waits until the previous one has finished.
pub struct PostgresSourceConnection {
    client: Arc<Mutex<Client>>,
}

#[async_trait]
impl SourceConnection for PostgresSourceConnection {
    async fn read_rows(&mut self, request: &ReadRequest) -> Result<RowStream<'static>> {
        let table = TableName::parse(&request.table);
        let guard = self.client.clone().lock_owned().await;

        let primary_key = if request.order_by.is_empty() || request.key_columns.is_some() {
            Vec::new()
        } else {
            query::primary_key_columns(&guard, &table)
                .await
                .map_err(|e| SyncError::extraction(&request.table, e))?
        };

        let sql = query::select_sql(request, &primary_key);
        debug!("PostgreSQL extraction query for {}: {}", request.table, sql);

        let (tx, rx) = mpsc::channel(request.batch_size.max(1));
        let read = PortalRead {
            table: request.table.clone(),
            sql,
            filter: request.filter.as_ref().map(|f| f.value.clone()),
            batch_size: request.batch_size.max(1),
        };
        tokio::spawn(async move {
            if let Err(e) = read.run(guard, &tx).await {
                // The consumer may already be gone; nothing else to report to.
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Waits for a running producer; the connection task ends with the client.
        let client = self.client.lock().await;
        drop(client);
        Ok(())
    }
}

struct PortalRead {
    table: String,
    sql: String,
    filter: Option<sync_core::Value>,
    batch_size: usize,
}

impl PortalRead {
    async fn run(self, mut client: OwnedMutexGuard<Client>, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
        let err = |e: tokio_postgres::Error| SyncError::extraction(&self.table, e);

        let transaction = client.transaction().await.map_err(err)?;
        let statement = transaction.prepare(&self.sql).await.map_err(err)?;

        let mut params: Vec<value::Param> = Vec::new();
        if let (Some(filter), Some(ty)) = (&self.filter, statement.params().first()) {
            params.push(
                value::to_sql_param(filter, ty)
                    .map_err(|e| SyncError::extraction(&self.table, e))?,
            );
        }
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let portal = transaction.bind(&statement, &param_refs).await.map_err(err)?;
        let max_rows = i32::try_from(self.batch_size).unwrap_or(i32::MAX);

        let mut column_names: Option<Arc<[String]>> = None;
        let mut count = 0u64;

        loop {
            let rows = transaction
                .query_portal(&portal, max_rows)
                .await
                .map_err(err)?;
            let fetched = rows.len();

            for row in rows {
                let names = column_names
                    .get_or_insert_with(|| {
                        row.columns().iter().map(|c| c.name().to_string()).collect()
                    })
                    .clone();
                let mut values = Vec::with_capacity(row.len());
                for i in 0..row.len() {
                    values.push(
                        value::from_pg(&row, i)
                            .map_err(|e| SyncError::extraction(&self.table, e))?,
                    );
                }
                if tx.send(Ok(Row::new(names, values))).await.is_err() {
                    warn!("Consumer of {} stopped after {} rows", self.table, count);
                    return Ok(());
                }
                count += 1;
            }

            if fetched < self.batch_size {
                break;
            }
        }

        transaction.commit().await.map_err(err)?;
        debug!("Extracted {} rows from {}", count, self.table);
        Ok(())
    }
}
