//! MySQL target connector.
//!
//! `Append` inserts inside one transaction. `Replace` loads into a staging
//! table created `LIKE` the target and swaps it in with a single atomic
//! `RENAME TABLE`, so readers see either the old or the new contents.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Pool, TxOpts};
use sync_core::{
    next_batch, rows_per_statement, ConnectionConfig, LoadRequest, Result, RowStream, SyncError,
    TableName, TargetConnection, TargetConnector, WriteMode,
};
use tracing::{debug, info, warn};

use crate::{client, query, value, ENGINE};

const STAGING_SUFFIX: &str = "__sync_staging";
const RETIRED_SUFFIX: &str = "__sync_old";

/// Writes tables into a MySQL database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlTarget;

#[async_trait]
impl TargetConnector for MySqlTarget {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn TargetConnection>> {
        let (pool, conn) = client::connect(config).await?;
        Ok(Box::new(MySqlTargetConnection { pool, conn }))
    }
}

/// Open MySQL target connection.
pub struct MySqlTargetConnection {
    pool: Pool,
    conn: Conn,
}

impl MySqlTargetConnection {
    async fn append(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64> {
        let table = TableName::parse(&request.table);
        let mut tx = self
            .conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| SyncError::load(&request.table, e))?;

        // Dropping an uncommitted transaction rolls it back.
        let written = insert_rows(&mut tx, &table, rows, request.batch_size).await?;
        tx.commit()
            .await
            .map_err(|e| SyncError::load(&request.table, e))?;
        Ok(written)
    }

    async fn replace(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64> {
        let table = TableName::parse(&request.table);
        let staging = table.with_suffix(STAGING_SUFFIX);
        let retired = table.with_suffix(RETIRED_SUFFIX);

        // Leftovers of an interrupted run
        for stale in [&staging, &retired] {
            self.execute(&request.table, format!("DROP TABLE IF EXISTS {}", query::quote_table(stale)))
                .await?;
        }

        self.execute(
            &request.table,
            format!(
                "CREATE TABLE {} LIKE {}",
                query::quote_table(&staging),
                query::quote_table(&table)
            ),
        )
        .await?;

        let loaded = async {
            let written = insert_rows(&mut self.conn, &staging, rows, request.batch_size).await?;
            self.execute(
                &request.table,
                format!(
                    "RENAME TABLE {t} TO {r}, {s} TO {t}",
                    t = query::quote_table(&table),
                    r = query::quote_table(&retired),
                    s = query::quote_table(&staging),
                ),
            )
            .await?;
            Ok::<_, SyncError>(written)
        }
        .await;

        match loaded {
            Ok(written) => {
                if let Err(e) = self
                    .execute(&request.table, format!("DROP TABLE {}", query::quote_table(&retired)))
                    .await
                {
                    warn!("Replaced {} but could not drop {}: {}", table, retired, e);
                }
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = self
                    .execute(
                        &request.table,
                        format!("DROP TABLE IF EXISTS {}", query::quote_table(&staging)),
                    )
                    .await
                {
                    warn!("Failed to drop staging table {}: {}", staging, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, table: &str, sql: String) -> Result<()> {
        debug!("MySQL: {}", sql);
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| SyncError::load(table, e))
    }
}

#[async_trait]
impl TargetConnection for MySqlTargetConnection {
    async fn load_rows(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64> {
        let written = match request.mode {
            WriteMode::Append => self.append(request, rows).await?,
            WriteMode::Replace => self.replace(request, rows).await?,
        };
        info!(
            "Loaded {} rows into MySQL table {} ({})",
            written, request.table, request.mode
        );
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        client::disconnect(this.pool, this.conn).await
    }
}

/// Drain `rows` into `table` with multi-row INSERTs.
async fn insert_rows<Q>(
    conn: &mut Q,
    table: &TableName,
    mut rows: RowStream<'_>,
    batch_size: usize,
) -> Result<u64>
where
    Q: Queryable + Send,
{
    let table_name = table.to_string();
    let mut written = 0u64;

    loop {
        let batch = next_batch(&mut rows, batch_size.max(1)).await?;
        let Some(first) = batch.first() else {
            break;
        };
        let columns = first.column_names();
        let per_statement = rows_per_statement(columns.len(), batch_size);

        for chunk in batch.chunks(per_statement) {
            let sql = query::insert_sql(table, &columns, chunk.len());
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|row| row.values().iter().map(value::to_mysql))
                .collect();
            conn.exec_drop(sql, Params::Positional(params))
                .await
                .map_err(|e| SyncError::load(&table_name, e))?;
            written += chunk.len() as u64;
        }
        debug!("Inserted {} rows into {} so far", written, table_name);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_table_names_stay_in_schema() {
        let table = TableName::parse("shop.orders");
        assert_eq!(
            query::quote_table(&table.with_suffix(STAGING_SUFFIX)),
            "`shop`.`orders__sync_staging`"
        );
        assert_eq!(
            query::quote_table(&table.with_suffix(RETIRED_SUFFIX)),
            "`shop`.`orders__sync_old`"
        );
    }
}
