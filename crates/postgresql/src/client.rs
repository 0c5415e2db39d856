//! PostgreSQL connection setup.

use sync_core::{ConnectionConfig, Result, SyncError};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::ENGINE;

const DEFAULT_PORT: u16 = 5432;

/// Build driver configuration from connection parameters.
pub fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port.unwrap_or(DEFAULT_PORT))
        .dbname(&config.database)
        .user(&config.user)
        .password(&config.password)
        .application_name("table-sync");
    pg
}

/// Connect and spawn the connection handler.
pub async fn connect(config: &ConnectionConfig) -> Result<Client> {
    let (client, connection) = pg_config(config).connect(NoTls).await.map_err(|e| {
        SyncError::connection(ENGINE, format!("failed to connect to {config}: {e}"))
    })?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    // Naive timestamps and the UTC watermark values compare in the same zone
    client
        .batch_execute("SET TIME ZONE 'UTC'")
        .await
        .map_err(|e| SyncError::connection(ENGINE, e))?;

    debug!("Connected to PostgreSQL at {}", config);
    Ok(client)
}
