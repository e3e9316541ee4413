//! Disk spool for callback batches that no endpoint accepted.
//!
//! Each undelivered batch becomes one JSON file in the callback-log
//! directory. Files are written crash-safely: the batch goes to a `.tmp`
//! file that is fsynced, renamed into place, and the directory is fsynced
//! so the new entry survives a power loss.
//!
//! File names are `callback-<unix-millis>.log`, with a `-<i>` suffix when a
//! name is already taken.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;

use crate::types::CallbackRecord;

const FILE_PREFIX: &str = "callback-";
const FILE_EXTENSION: &str = "log";
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Errors that can occur during spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every candidate file name for this millisecond is taken.
    #[error("no free spool file name for timestamp {0}")]
    NamesExhausted(i64),
}

/// Result type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

/// The callback-log directory.
#[derive(Debug)]
pub struct CallbackSpool {
    dir: PathBuf,
    // Serialises name selection and rename between the sender and retryer.
    write_lock: Mutex<()>,
}

impl CallbackSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CallbackSpool {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably writes `batch` to a new spool file and returns its path.
    pub fn persist(&self, batch: &[CallbackRecord]) -> Result<PathBuf> {
        let payload = serde_json::to_vec(batch)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        fs::create_dir_all(&self.dir)?;
        let path = self.free_name(Utc::now().timestamp_millis())?;
        let temp_path = path.with_extension("log.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&payload)?;
            fsync_file(&file)?;
        }
        fs::rename(&temp_path, &path)?;
        fsync_dir(&self.dir)?;

        Ok(path)
    }

    fn free_name(&self, millis: i64) -> Result<PathBuf> {
        let first = self.dir.join(format!("{FILE_PREFIX}{millis}.{FILE_EXTENSION}"));
        if !first.exists() {
            return Ok(first);
        }
        (0..MAX_NAME_ATTEMPTS)
            .map(|i| self.dir.join(format!("{FILE_PREFIX}{millis}-{i}.{FILE_EXTENSION}")))
            .find(|p| !p.exists())
            .ok_or(SpoolError::NamesExhausted(millis))
    }

    /// Lists spooled batch files in name order. Temp files are skipped.
    pub fn pending(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == FILE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads a spooled batch. An empty file yields `Ok(None)`.
    pub fn load(&self, path: &Path) -> Result<Option<Vec<CallbackRecord>>> {
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let batch: Vec<CallbackRecord> = serde_json::from_slice(&bytes)?;
        Ok(Some(batch))
    }

    /// Deletes a spool file and makes the deletion durable.
    pub fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}

fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

// Renames and deletes only survive a crash once the directory entry is synced.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}
