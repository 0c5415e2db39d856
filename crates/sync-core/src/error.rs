//! Error types shared by the copy engine and the connectors.

use std::fmt;
use thiserror::Error;

/// Errors that abort a single table's copy run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source or target unreachable, authentication failure or unknown database.
    #[error("connection to {engine} failed: {message}")]
    Connection { engine: String, message: String },

    /// No connector is registered for the declared engine type.
    #[error("unsupported {role} engine type '{engine}'")]
    UnsupportedEngine { engine: String, role: &'static str },

    /// Query or read failure while streaming rows out of the source.
    #[error("extraction from '{table}' failed: {message}")]
    Extraction { table: String, message: String },

    /// Write failure while loading rows into the target.
    #[error("load into '{table}' failed: {message}")]
    Load { table: String, message: String },

    /// The conditional watermark write kept losing races.
    #[error("watermark for '{table}' lost {attempts} compare-and-set attempts")]
    WatermarkConflict { table: String, attempts: u32 },

    /// The watermark store could not be read or written.
    #[error("watermark store error for '{table}': {message}")]
    WatermarkStore { table: String, message: String },

    /// The run was cancelled before completing.
    #[error("copy of '{table}' was cancelled")]
    Cancelled { table: String },
}

/// Result type for connector and engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    UnsupportedEngine,
    Extraction,
    Load,
    WatermarkConflict,
    WatermarkStore,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::UnsupportedEngine => "unsupported_engine",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Load => "load",
            ErrorKind::WatermarkConflict => "watermark_conflict",
            ErrorKind::WatermarkStore => "watermark_store",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn connection(engine: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Connection {
            engine: engine.into(),
            message: err.to_string(),
        }
    }

    pub fn unsupported_source(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
            role: "source",
        }
    }

    pub fn unsupported_target(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
            role: "target",
        }
    }

    pub fn extraction(table: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Extraction {
            table: table.into(),
            message: err.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Load {
            table: table.into(),
            message: err.to_string(),
        }
    }

    pub fn watermark_store(table: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::WatermarkStore {
            table: table.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection { .. } => ErrorKind::Connection,
            SyncError::UnsupportedEngine { .. } => ErrorKind::UnsupportedEngine,
            SyncError::Extraction { .. } => ErrorKind::Extraction,
            SyncError::Load { .. } => ErrorKind::Load,
            SyncError::WatermarkConflict { .. } => ErrorKind::WatermarkConflict,
            SyncError::WatermarkStore { .. } => ErrorKind::WatermarkStore,
            SyncError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether invoking the same run again may succeed without a config fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::UnsupportedEngine { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_and_retryability() {
        let err = SyncError::unsupported_target("oracle");
        assert_eq!(err.kind(), ErrorKind::UnsupportedEngine);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "unsupported target engine type 'oracle'");

        let err = SyncError::extraction("orders", "timeout");
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "extraction from 'orders' failed: timeout");
    }
}
