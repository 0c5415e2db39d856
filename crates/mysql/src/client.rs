//! MySQL connection setup.

use mysql_async::{Conn, Opts, OptsBuilder, Pool};
use sync_core::{ConnectionConfig, Result, SyncError};
use tracing::debug;

use crate::ENGINE;

const DEFAULT_PORT: u16 = 3306;

/// Build driver options from connection parameters.
///
/// Every session runs in UTC so TIMESTAMP columns read and compare as UTC
/// wall-clock values.
pub fn opts(config: &ConnectionConfig) -> Opts {
    let builder = OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port.unwrap_or(DEFAULT_PORT))
        .user(Some(config.user.clone()))
        .pass(Some(config.password.clone()))
        .db_name(Some(config.database.clone()))
        .init(vec!["SET time_zone = '+00:00'"]);
    Opts::from(builder)
}

/// Create a pool and check out one connection to validate the credentials.
pub async fn connect(config: &ConnectionConfig) -> Result<(Pool, Conn)> {
    let pool = Pool::new(opts(config));
    let conn = pool.get_conn().await.map_err(|e| {
        SyncError::connection(ENGINE, format!("failed to connect to {config}: {e}"))
    })?;
    debug!("Connected to MySQL at {}", config);
    Ok((pool, conn))
}

/// Return `conn` to the pool and wait for the pool to shut down.
pub async fn disconnect(pool: Pool, conn: Conn) -> Result<()> {
    drop(conn);
    pool.disconnect()
        .await
        .map_err(|e| SyncError::connection(ENGINE, format!("failed to close pool: {e}")))
}
