//! Outcome of one table's copy run.

use crate::error::{ErrorKind, SyncError};
use crate::types::{LoadMode, Watermark};
use std::fmt;
use std::time::Duration;

/// States of the per-table copy state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyState {
    Init,
    ModeResolved,
    Extracting,
    Loading,
    /// Terminal success.
    WatermarkCommitted,
    /// Terminal failure.
    Failed,
}

impl CopyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyState::Init => "init",
            CopyState::ModeResolved => "mode_resolved",
            CopyState::Extracting => "extracting",
            CopyState::Loading => "loading",
            CopyState::WatermarkCommitted => "watermark_committed",
            CopyState::Failed => "failed",
        }
    }
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyStatus {
    Success,
    /// The table is disabled in the catalog.
    Skipped,
    Failure,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Success => "success",
            CopyStatus::Skipped => "skipped",
            CopyStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run failed and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub kind: ErrorKind,
    /// Last state entered before the error.
    pub state: CopyState,
    pub message: String,
    pub retryable: bool,
}

/// Result of one table run. Returned to the caller, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyResult {
    pub table_name: String,
    /// Effective mode; the declared mode when the run ended before the mode
    /// was resolved.
    pub mode: LoadMode,
    pub rows_copied: u64,
    /// Stored watermark after the run. `None` when no tracking applies or
    /// the table has never produced one.
    pub new_watermark: Option<Watermark>,
    pub status: CopyStatus,
    pub failure: Option<CopyFailure>,
    pub elapsed: Duration,
}

impl CopyResult {
    pub fn success(
        table_name: impl Into<String>,
        mode: LoadMode,
        rows_copied: u64,
        new_watermark: Option<Watermark>,
        elapsed: Duration,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            mode,
            rows_copied,
            new_watermark,
            status: CopyStatus::Success,
            failure: None,
            elapsed,
        }
    }

    pub fn skipped(table_name: impl Into<String>, mode: LoadMode) -> Self {
        Self {
            table_name: table_name.into(),
            mode,
            rows_copied: 0,
            new_watermark: None,
            status: CopyStatus::Skipped,
            failure: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failure(
        table_name: impl Into<String>,
        mode: LoadMode,
        state: CopyState,
        error: &SyncError,
        elapsed: Duration,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            mode,
            rows_copied: 0,
            new_watermark: None,
            status: CopyStatus::Failure,
            failure: Some(CopyFailure {
                kind: error.kind(),
                state,
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CopyStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == CopyStatus::Failure
    }
}
