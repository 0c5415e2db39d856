//! PostgreSQL table watermark storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_core::{ConnectionConfig, Watermark, WatermarkType};
use tokio_postgres::{Client, NoTls};

use crate::store::{CasOutcome, StoredWatermark, WatermarkStore};

/// Default table holding the watermarks.
pub const DEFAULT_TABLE: &str = "table_sync_watermarks";

/// PostgreSQL implementation of WatermarkStore trait.
///
/// Keeps one row per copied table. Conditional writes are a single
/// `INSERT .. ON CONFLICT DO NOTHING` (first write) or
/// `UPDATE .. WHERE watermark_value = expected` statement, so the database's
/// row lock decides races between concurrent runs.
pub struct PostgresStore {
    client: Client,
    table_name: String,
}

impl PostgresStore {
    /// Create a new PostgresStore with the given client and table name.
    pub fn new(client: Client, table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        if !is_valid_table_name(&table_name) {
            anyhow::bail!("Invalid watermark table name '{table_name}'");
        }
        Ok(Self { client, table_name })
    }

    /// Connect with the given parameters and make sure the table exists.
    pub async fn connect(config: &ConnectionConfig, table_name: &str) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port.unwrap_or(5432))
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .with_context(|| format!("Failed to connect to watermark store at {config}"))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Watermark store connection error: {e}");
            }
        });

        let store = Self::new(client, table_name)?;
        store.ensure_table().await?;
        Ok(store)
    }

    /// Create the watermark table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                table_name TEXT PRIMARY KEY,
                watermark_type TEXT NOT NULL,
                watermark_value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table_name
        );
        self.client
            .batch_execute(&ddl)
            .await
            .with_context(|| format!("Failed to create watermark table {}", self.table_name))?;
        Ok(())
    }
}

/// Watermark table names are spliced into SQL text, so only plain
/// identifiers are accepted.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl WatermarkStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgresql"
    }

    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>> {
        let query = format!(
            "SELECT watermark_type, watermark_value, updated_at FROM \"{}\" WHERE table_name = $1",
            self.table_name
        );
        let rows = self.client.query(&query, &[&table]).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let watermark_type: String = row.get(0);
        let encoded: String = row.get(1);
        let updated_at: DateTime<Utc> = row.get(2);

        let watermark_type: WatermarkType = watermark_type.parse()?;
        let value = Watermark::decode(watermark_type, &encoded)?;
        Ok(Some(StoredWatermark {
            table_name: table.to_string(),
            value,
            updated_at,
        }))
    }

    async fn compare_and_set(
        &self,
        table: &str,
        expected: Option<&Watermark>,
        new: &Watermark,
    ) -> Result<CasOutcome> {
        let new_type = new.watermark_type().as_str();
        let new_value = new.encode();

        let affected = match expected {
            None => {
                let statement = format!(
                    "INSERT INTO \"{}\" (table_name, watermark_type, watermark_value, updated_at)
                     VALUES ($1, $2, $3, now())
                     ON CONFLICT (table_name) DO NOTHING",
                    self.table_name
                );
                self.client
                    .execute(&statement, &[&table, &new_type, &new_value])
                    .await?
            }
            Some(expected) => {
                let expected_type = expected.watermark_type().as_str();
                let expected_value = expected.encode();
                let statement = format!(
                    "UPDATE \"{}\"
                     SET watermark_type = $2, watermark_value = $3, updated_at = now()
                     WHERE table_name = $1 AND watermark_type = $4 AND watermark_value = $5",
                    self.table_name
                );
                self.client
                    .execute(
                        &statement,
                        &[&table, &new_type, &new_value, &expected_type, &expected_value],
                    )
                    .await?
            }
        };

        if affected == 1 {
            tracing::debug!("Stored watermark {} for {}", new_value, table);
            Ok(CasOutcome::Applied)
        } else {
            Ok(CasOutcome::Conflict)
        }
    }
}
