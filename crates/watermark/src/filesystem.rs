//! Filesystem-based watermark storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::Watermark;

use crate::store::{matches_expected, CasOutcome, StoredWatermark, WatermarkStore};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Filesystem implementation of WatermarkStore trait.
///
/// Stores one JSON file per table in a directory. Conditional writes hold an
/// exclusive lock on `<table>.json.lock`, so processes sharing the directory
/// serialize their updates, and replace the record through a rename so
/// readers never see a partial file. A writer that crashed leaves no lock
/// behind.
pub struct FilesystemStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// How long a conditional write waits for another writer's lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn record_path(&self, table: &str) -> PathBuf {
        let file_stem: String = table
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{file_stem}.json"))
    }

    fn read_record(path: &Path) -> Result<Option<StoredWatermark>> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let record = serde_json::from_str(&content)
                    .with_context(|| format!("Corrupt watermark file {}", path.display()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn acquire_lock(&self, record_path: &Path) -> Result<LockFile> {
        let lock_path = record_path.with_extension("json.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open {}", lock_path.display()))?;

        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock() {
                Ok(()) => return LockFile::claim(file, &lock_path),
                Err(TryLockError::WouldBlock) => {
                    if tokio::time::Instant::now() >= deadline {
                        anyhow::bail!(
                            "Timed out waiting for watermark lock {}",
                            lock_path.display()
                        );
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(TryLockError::Error(e)) => {
                    return Err(e)
                        .with_context(|| format!("Failed to lock {}", lock_path.display()))
                }
            }
        }
    }
}

/// Exclusive advisory lock on a `<table>.json.lock` file.
///
/// The lock belongs to the open file, so the OS releases it when the guard
/// is dropped or the owning process dies. The file itself stays in place and
/// only records the last owner's PID.
struct LockFile {
    file: File,
}

impl LockFile {
    fn claim(mut file: File, path: &Path) -> Result<Self> {
        file.set_len(0)
            .and_then(|_| file.write_all(std::process::id().to_string().as_bytes()))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release watermark lock: {e}");
        }
    }
}

#[async_trait]
impl WatermarkStore for FilesystemStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, table: &str) -> Result<Option<StoredWatermark>> {
        Self::read_record(&self.record_path(table))
    }

    async fn compare_and_set(
        &self,
        table: &str,
        expected: Option<&Watermark>,
        new: &Watermark,
    ) -> Result<CasOutcome> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.record_path(table);
        let _lock = self.acquire_lock(&path).await?;

        let current = Self::read_record(&path)?;
        if !matches_expected(current.as_ref(), expected) {
            return Ok(CasOutcome::Conflict);
        }

        let record = StoredWatermark::new(table, new.clone());
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::debug!("Stored watermark {} for {} in {}", new, table, path.display());
        Ok(CasOutcome::Applied)
    }
}
