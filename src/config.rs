//! TOML run configuration.
//!
//! ```toml
//! batch_size = 1000
//! concurrency = 4
//! max_watermark_retries = 5
//!
//! [environments.dev.source]
//! engine = "mysql"
//! host = "127.0.0.1"
//! port = 3306
//! database = "retail_db"
//!
//! [environments.dev.target]
//! engine = "postgresql"
//! host = "127.0.0.1"
//! database = "retail_dw"
//! user_env = "DW_USER"
//!
//! [environments.dev.watermarks]
//! backend = "filesystem"
//! path = ".table-sync/watermarks"
//! ```
//!
//! Logins come from the literal `user`/`password` fields when present,
//! otherwise from the environment variables named by `user_env`/`password_env`
//! (defaults per side: `SOURCE_DB_USER`, `SOURCE_DB_PASS`, `TARGET_DB_USER`,
//! `TARGET_DB_PASS`, `WATERMARK_DB_USER`, `WATERMARK_DB_PASS`).

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_core::{ConnectionConfig, Credentials};
use tracing::debug;
use watermark::{FilesystemStore, MemoryStore, PostgresStore, WatermarkStore};

use crate::engine::EngineOptions;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_WATERMARK_RETRIES: u32 = 5;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_watermark_retries() -> u32 {
    DEFAULT_MAX_WATERMARK_RETRIES
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rows per fetch and per insert statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Table groups run at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_watermark_retries")]
    pub max_watermark_retries: u32,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Databases and watermark store of one environment (`dev`, `prod`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub source: DatabaseSection,
    pub target: DatabaseSection,
    #[serde(default)]
    pub watermarks: WatermarkSection,
}

/// Connection parameters of one database as written in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub engine: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub user_env: Option<String>,
    pub password_env: Option<String>,
}

/// Which side of a run a database section describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
    Watermarks,
}

impl Side {
    fn env_defaults(&self) -> (&'static str, &'static str) {
        match self {
            Side::Source => ("SOURCE_DB_USER", "SOURCE_DB_PASS"),
            Side::Target => ("TARGET_DB_USER", "TARGET_DB_PASS"),
            Side::Watermarks => ("WATERMARK_DB_USER", "WATERMARK_DB_PASS"),
        }
    }
}

impl DatabaseSection {
    /// Resolve the login from the process environment.
    pub fn connection_config(&self, side: Side) -> ConnectionConfig {
        self.connection_config_with(side, |name| std::env::var(name).ok())
    }

    /// Resolve the login with an explicit variable lookup.
    pub fn connection_config_with(
        &self,
        side: Side,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConnectionConfig {
        let (user_var, password_var) = side.env_defaults();
        let user = self.user.clone().or_else(|| {
            lookup(self.user_env.as_deref().unwrap_or(user_var))
        });
        let password = self.password.clone().or_else(|| {
            lookup(self.password_env.as_deref().unwrap_or(password_var))
        });
        ConnectionConfig::new(self.engine.trim().to_ascii_lowercase(), &self.database)
            .with_host(&self.host, self.port)
            .with_login(user.unwrap_or_default(), password.unwrap_or_default())
    }
}

/// Watermark store backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum WatermarkSection {
    /// Process-local; nothing survives the run.
    Memory,
    /// One JSON file per table under `path`.
    Filesystem { path: PathBuf },
    /// A table in a PostgreSQL database.
    Postgresql {
        connection: DatabaseSection,
        #[serde(default)]
        table: Option<String>,
    },
}

impl Default for WatermarkSection {
    fn default() -> Self {
        WatermarkSection::Filesystem {
            path: PathBuf::from(".table-sync/watermarks"),
        }
    }
}

impl WatermarkSection {
    /// Open the configured store.
    pub async fn open(&self) -> anyhow::Result<Arc<dyn WatermarkStore>> {
        match self {
            WatermarkSection::Memory => Ok(Arc::new(MemoryStore::new())),
            WatermarkSection::Filesystem { path } => {
                debug!("Using filesystem watermark store at {}", path.display());
                Ok(Arc::new(FilesystemStore::new(path.clone())))
            }
            WatermarkSection::Postgresql { connection, table } => {
                let config = connection.connection_config(Side::Watermarks);
                let table = table.as_deref().unwrap_or(watermark::DEFAULT_TABLE);
                let store = PostgresStore::connect(&config, table)
                    .await
                    .with_context(|| format!("Failed to open watermark table {table} at {config}"))?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl EnvironmentConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.source.connection_config(Side::Source),
            self.target.connection_config(Side::Target),
        )
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be greater than zero");
        }
        if self.max_watermark_retries == 0 {
            bail!("max_watermark_retries must be greater than zero");
        }
        Ok(())
    }

    pub fn environment(&self, name: &str) -> anyhow::Result<&EnvironmentConfig> {
        self.environments.get(name).with_context(|| {
            let known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
            format!("Unknown environment '{name}' (configured: {})", known.join(", "))
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            batch_size: self.batch_size,
            max_watermark_retries: self.max_watermark_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        batch_size = 500

        [environments.dev.source]
        engine = "MySQL"
        port = 3306
        database = "retail_db"
        user = "retail_user"
        password_env = "RETAIL_PASS"

        [environments.dev.target]
        engine = "postgresql"
        host = "dw.internal"
        database = "retail_dw"

        [environments.dev.watermarks]
        backend = "memory"
    "#;

    #[test]
    fn test_defaults_and_overrides() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.max_watermark_retries, DEFAULT_MAX_WATERMARK_RETRIES);

        let env = config.environment("dev").unwrap();
        assert!(matches!(env.watermarks, WatermarkSection::Memory));
    }

    #[test]
    fn test_logins_resolve_from_literals_then_environment() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let env = config.environment("dev").unwrap();
        let lookup = |name: &str| match name {
            "RETAIL_PASS" => Some("from-env".to_string()),
            "TARGET_DB_USER" => Some("dw_user".to_string()),
            "TARGET_DB_PASS" => Some("dw_pass".to_string()),
            _ => None,
        };

        let source = env.source.connection_config_with(Side::Source, lookup);
        assert_eq!(source.engine, "mysql");
        assert_eq!(source.user, "retail_user");
        assert_eq!(source.password, "from-env");
        assert_eq!(source.host, "127.0.0.1");

        let target = env.target.connection_config_with(Side::Target, lookup);
        assert_eq!(target.user, "dw_user");
        assert_eq!(target.password, "dw_pass");
        assert_eq!(target.to_string(), "postgresql://dw_user@dw.internal/retail_dw");
    }

    #[test]
    fn test_unknown_environment_lists_known_ones() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let err = config.environment("prod").unwrap_err();
        assert!(err.to_string().contains("configured: dev"));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = Config::from_toml_str("batch_size = 0").unwrap_err();
        assert!(format!("{err:#}").contains("batch_size must be greater than zero"));
    }

    #[test]
    fn test_watermark_backend_defaults_to_filesystem() {
        let text = r#"
            [environments.dev.source]
            engine = "mysql"
            database = "a"
            [environments.dev.target]
            engine = "csv"
            database = "/tmp/out"
        "#;
        let config = Config::from_toml_str(text).unwrap();
        let env = config.environment("dev").unwrap();
        assert!(matches!(env.watermarks, WatermarkSection::Filesystem { .. }));
    }

    #[test]
    fn test_postgres_watermark_section() {
        let text = r#"
            [environments.dev.source]
            engine = "mysql"
            database = "a"
            [environments.dev.target]
            engine = "postgresql"
            database = "b"
            [environments.dev.watermarks]
            backend = "postgresql"
            table = "etl_watermarks"
            [environments.dev.watermarks.connection]
            engine = "postgresql"
            database = "etl_state"
        "#;
        let config = Config::from_toml_str(text).unwrap();
        match &config.environment("dev").unwrap().watermarks {
            WatermarkSection::Postgresql { connection, table } => {
                assert_eq!(connection.database, "etl_state");
                assert_eq!(table.as_deref(), Some("etl_watermarks"));
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }
}
