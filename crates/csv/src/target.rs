//! CSV target connector.
//!
//! Rows are first written to `<table>.csv.tmp`. On success `Replace` renames
//! the temporary file over `<table>.csv` and `Append` copies it onto the end
//! of the existing file, so a failed load never leaves partial rows behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sync_core::{
    next_batch, ConnectionConfig, LoadRequest, Result, Row, RowStream, SyncError,
    TargetConnection, TargetConnector, WriteMode,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::ENGINE;

/// Writes tables as CSV files into a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvTarget;

#[async_trait]
impl TargetConnector for CsvTarget {
    fn engine(&self) -> &'static str {
        ENGINE
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn TargetConnection>> {
        let dir = PathBuf::from(&config.database);
        fs::create_dir_all(&dir).await.map_err(|e| {
            SyncError::connection(ENGINE, format!("cannot create {}: {e}", dir.display()))
        })?;
        debug!("CSV target directory {}", dir.display());
        Ok(Box::new(CsvTargetConnection { dir }))
    }
}

/// Open CSV target: an output directory.
#[derive(Debug)]
pub struct CsvTargetConnection {
    dir: PathBuf,
}

impl CsvTargetConnection {
    /// Path of the file holding `table`.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    async fn write_temp(
        &self,
        request: &LoadRequest,
        tmp_path: &Path,
        mut rows: RowStream<'_>,
        existing_header: Option<Vec<String>>,
    ) -> Result<u64> {
        let table = request.table.as_str();
        let io_err = |e: std::io::Error| SyncError::load(table, e);

        let mut file = fs::File::create(tmp_path).await.map_err(io_err)?;
        let mut written = 0u64;
        let mut header_done = false;

        loop {
            let batch = next_batch(&mut rows, request.batch_size.max(1)).await?;
            let Some(first) = batch.first() else {
                break;
            };

            if !header_done {
                match &existing_header {
                    Some(header) if header.as_slice() != first.columns() => {
                        return Err(SyncError::load(
                            table,
                            format!(
                                "columns {:?} do not match existing header {:?}",
                                first.columns(),
                                header
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        let header = encode_records(table, std::iter::once(first.columns()))?;
                        file.write_all(&header).await.map_err(io_err)?;
                    }
                }
                header_done = true;
            }

            let encoded = encode_rows(table, &batch)?;
            file.write_all(&encoded).await.map_err(io_err)?;
            written += batch.len() as u64;
        }

        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(written)
    }
}

#[async_trait]
impl TargetConnection for CsvTargetConnection {
    async fn load_rows(&mut self, request: &LoadRequest, rows: RowStream<'_>) -> Result<u64> {
        let table = request.table.as_str();
        let path = self.table_path(table);
        let tmp_path = self.dir.join(format!("{table}.csv.tmp"));
        let io_err = |e: std::io::Error| SyncError::load(table, e);

        let existing_header = match request.mode {
            WriteMode::Replace => None,
            WriteMode::Append => read_header(&path).await.map_err(io_err)?,
        };

        let written = match self.write_temp(request, &tmp_path, rows, existing_header).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                    warn!("Failed to remove {}: {}", tmp_path.display(), cleanup);
                }
                return Err(e);
            }
        };

        match request.mode {
            WriteMode::Replace => fs::rename(&tmp_path, &path).await.map_err(io_err)?,
            WriteMode::Append => {
                let mut staged = fs::File::open(&tmp_path).await.map_err(io_err)?;
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(io_err)?;
                tokio::io::copy(&mut staged, &mut file).await.map_err(io_err)?;
                file.flush().await.map_err(io_err)?;
                file.sync_all().await.map_err(io_err)?;
                fs::remove_file(&tmp_path).await.map_err(io_err)?;
            }
        }

        info!(
            "Wrote {} rows to {} ({})",
            written,
            path.display(),
            request.mode
        );
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Header of an existing non-empty CSV file. Only the first record is read.
async fn read_header(path: &Path) -> std::io::Result<Option<Vec<String>>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut record = csv::StringRecord::new();
        if reader
            .read_record(&mut record)
            .map_err(std::io::Error::other)?
        {
            Ok(Some(record.iter().map(str::to_string).collect()))
        } else {
            Ok(None)
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

fn encode_rows(table: &str, rows: &[Row]) -> Result<Vec<u8>> {
    encode_records(
        table,
        rows.iter().map(|row| {
            row.values()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
        }),
    )
}

fn encode_records<I, R, F>(table: &str, records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for record in records {
        writer
            .write_record(record)
            .map_err(|e| SyncError::load(table, e))?;
    }
    writer
        .into_inner()
        .map_err(|e| SyncError::load(table, e.error()))
}
