//! Append-only scan log.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sl_protocol::LOG_HEADER;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

/// Destination for newline-terminated scan log rows.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, row: &str) -> Result<(), StorageError>;
}

/// CSV file named after the session start time.
pub struct CsvFileSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl CsvFileSink {
    /// Create `{dir}/data_{YYYY-MM-DD_HH-MM-SS}.csv` and write the header.
    pub async fn create(dir: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, e))?;

        let path = dir.join(format!("data_{}.csv", now.format("%Y-%m-%d_%H-%M-%S")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(format!("{LOG_HEADER}\n").as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        tracing::info!(path = %path.display(), "scan log opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for CsvFileSink {
    async fn append(&self, row: &str) -> Result<(), StorageError> {
        let mut file = self.file.lock().await;
        file.write_all(row.as_bytes())
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.flush().await.map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make subsequent appends fail, as on a full card.
    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, row: &str) -> Result<(), StorageError> {
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(StorageError::Io {
                path: "memory".into(),
                reason: "write refused".into(),
            });
        }
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(row.to_string());
        Ok(())
    }
}
