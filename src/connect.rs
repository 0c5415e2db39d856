//! Connector registry keyed by engine type.

use std::collections::HashMap;
use std::sync::Arc;
use sync_core::{Result, SourceConnector, SyncError, TargetConnector};
use table_sync_csv::CsvTarget;
use table_sync_mysql::{MySqlSource, MySqlTarget};
use table_sync_postgresql::{PostgresSource, PostgresTarget};

/// Maps engine type strings to connector factories.
///
/// Lookups are case-insensitive. Adding an engine means registering its
/// connectors here; the copy engine does not change.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: HashMap<String, Arc<dyn SourceConnector>>,
    targets: HashMap<String, Arc<dyn TargetConnector>>,
}

impl ConnectorRegistry {
    /// A registry with no connectors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// MySQL and PostgreSQL on both sides, CSV as a target.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_source(table_sync_mysql::ENGINE, Arc::new(MySqlSource));
        registry.register_target(table_sync_mysql::ENGINE, Arc::new(MySqlTarget));
        registry.register_source(table_sync_postgresql::ENGINE, Arc::new(PostgresSource));
        registry.register_target(table_sync_postgresql::ENGINE, Arc::new(PostgresTarget));
        registry.register_source("postgres", Arc::new(PostgresSource));
        registry.register_target("postgres", Arc::new(PostgresTarget));
        registry.register_target(table_sync_csv::ENGINE, Arc::new(CsvTarget));
        registry
    }

    pub fn register_source(&mut self, engine: &str, connector: Arc<dyn SourceConnector>) {
        self.sources.insert(engine.to_ascii_lowercase(), connector);
    }

    pub fn register_target(&mut self, engine: &str, connector: Arc<dyn TargetConnector>) {
        self.targets.insert(engine.to_ascii_lowercase(), connector);
    }

    pub fn source(&self, engine: &str) -> Result<Arc<dyn SourceConnector>> {
        self.sources
            .get(&engine.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| SyncError::unsupported_source(engine))
    }

    pub fn target(&self, engine: &str) -> Result<Arc<dyn TargetConnector>> {
        self.targets
            .get(&engine.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| SyncError::unsupported_target(engine))
    }

    /// Registered source engine types, sorted.
    pub fn source_engines(&self) -> Vec<&str> {
        let mut engines: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        engines.sort_unstable();
        engines
    }

    /// Registered target engine types, sorted.
    pub fn target_engines(&self) -> Vec<&str> {
        let mut engines: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        engines.sort_unstable();
        engines
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_engines())
            .field("targets", &self.target_engines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::ErrorKind;

    #[test]
    fn test_default_engines() {
        let registry = ConnectorRegistry::with_defaults();
        assert_eq!(registry.source_engines(), vec!["mysql", "postgres", "postgresql"]);
        assert_eq!(
            registry.target_engines(),
            vec!["csv", "mysql", "postgres", "postgresql"]
        );
        assert_eq!(registry.source("MySQL").unwrap().engine(), "mysql");
        assert_eq!(registry.target("postgres").unwrap().engine(), "postgresql");
    }

    #[test]
    fn test_unknown_engines_are_unsupported() {
        let registry = ConnectorRegistry::with_defaults();

        let err = registry.source("oracle").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedEngine);
        assert!(!err.is_retryable());

        // CSV is target-only
        let err = registry.source("csv").err().unwrap();
        assert_eq!(err.to_string(), "unsupported source engine type 'csv'");
    }
}
