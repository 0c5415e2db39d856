//! PostgreSQL target connector.
//!
//! Both write modes run in a single transaction. `Replace` deletes the
//! existing rows inside that transaction, so concurrent readers keep seeing
//! the old contents until the commit.

use std::collections::HashMap;

use async_trait::async_trait;
use sync_core::{
    next_batch, rows_per_statement, ConnectionConfig, LoadRequest, Result, RowStream, SyncError,
    TableName, TargetConnection, TargetConnector, WriteMode,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Statement, Transaction};
use tracing::{debug, info};

use crate::{client, query, value, ENGINE};

/// Writes tables into a PostgreSQL database.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresTarget;

#[async_trait]
impl TargetConnector for PostgresTarget {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn TargetConnection>> {
        let client = client::connect(config).await?;
        Ok(Box::new(PostgresTargetConnection { client }))
    }
}

/// Open PostgreSQL target connection.
pub struct PostgresTargetConnection {
    client: Client,
}

#[async_trait]
impl TargetConnection for PostgresTargetConnection {
    async fn load_rows(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64> {
        let table = TableName::parse(&request.table);
        let load_err = |e: tokio_postgres::Error| SyncError::load(&request.table, e);

        let transaction = self.client.transaction().await.map_err(load_err)?;

        if request.mode == WriteMode::Replace {
            let deleted = transaction
                .execute(&format!("DELETE FROM {}", query::quote_table(&table)), &[])
                .await
                .map_err(load_err)?;
            debug!("Cleared {} rows from {} before reload", deleted, table);
        }

        // Dropping the transaction on error rolls it back.
        let written = insert_rows(&transaction, &table, rows, request.batch_size).await?;
        transaction.commit().await.map_err(load_err)?;

        info!(
            "Loaded {} rows into PostgreSQL table {} ({})",
            written, request.table, request.mode
        );
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // The spawned connection task finishes once the client is dropped.
        drop(self.client);
        Ok(())
    }
}

/// Drain `rows` into `table` with multi-row INSERTs.
///
/// Statements are prepared once per distinct row count so every value can
/// be coerced to the parameter type the server inferred for its column.
async fn insert_rows(
    transaction: &Transaction<'_>,
    table: &TableName,
    mut rows: RowStream<'_>,
    batch_size: usize,
) -> Result<u64> {
    let table_name = table.to_string();
    let load_err = |e: tokio_postgres::Error| SyncError::load(&table_name, e);
    let mut statements: HashMap<usize, Statement> = HashMap::new();
    let mut written = 0u64;

    loop {
        let batch = next_batch(&mut rows, batch_size.max(1)).await?;
        let Some(first) = batch.first() else {
            break;
        };
        let columns = first.column_names();
        let per_statement = rows_per_statement(columns.len(), batch_size);

        for chunk in batch.chunks(per_statement) {
            let statement = match statements.get(&chunk.len()) {
                Some(statement) => statement.clone(),
                None => {
                    let sql = query::insert_sql(table, &columns, chunk.len());
                    let statement = transaction.prepare(&sql).await.map_err(load_err)?;
                    statements.insert(chunk.len(), statement.clone());
                    statement
                }
            };

            let types = statement.params();
            let mut params: Vec<value::Param> = Vec::with_capacity(types.len());
            for (row_idx, row) in chunk.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(SyncError::load(
                        &table_name,
                        format!("row has {} values, expected {}", row.len(), columns.len()),
                    ));
                }
                for (col_idx, v) in row.values().iter().enumerate() {
                    let ty = &types[row_idx * columns.len() + col_idx];
                    let param = value::to_sql_param(v, ty).map_err(|e| {
                        SyncError::load(&table_name, format!("column '{}': {e}", columns[col_idx]))
                    })?;
                    params.push(param);
                }
            }
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            transaction
                .execute(&statement, &param_refs)
                .await
                .map_err(load_err)?;
            written += chunk.len() as u64;
        }
        debug!("Inserted {} rows into {} so far", written, table_name);
    }

    Ok(written)
}
