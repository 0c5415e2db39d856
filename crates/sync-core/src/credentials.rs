//! Connection parameters handed to connector construction.

use std::fmt;

/// Connection parameters for one database.
///
/// The password is never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Engine type resolved by the connector registry (e.g. "mysql").
    pub engine: String,
    pub host: String,
    /// Engine default when `None`.
    pub port: Option<u16>,
    /// Database name. The CSV connector reads it as an output directory.
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionConfig {
    pub fn new(engine: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            host: "127.0.0.1".to_string(),
            port: None,
            database: database.into(),
            user: String::new(),
            password: String::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// `engine://user@host[:port]/database`, safe for logs.
    pub fn redacted(&self) -> String {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{}://{}@{}{}/{}",
            self.engine, self.user, self.host, port, self.database
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Source and target connection parameters for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
}

impl Credentials {
    pub fn new(source: ConnectionConfig, target: ConnectionConfig) -> Self {
        Self { source, target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_redacted() {
        let config = ConnectionConfig::new("mysql", "retail_db")
            .with_host("db.internal", Some(3306))
            .with_login("retail_user", "s3cret");

        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("***"));
        assert_eq!(config.to_string(), "mysql://retail_user@db.internal:3306/retail_db");
    }
}
