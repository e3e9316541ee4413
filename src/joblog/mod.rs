//! Per-trigger execution logs.
//!
//! Every trigger gets a plain-text log file at
//! `<base>/<yyyy-MM-dd>/<logId>.log`, dated by the trigger time (UTC).
//! Handlers append to it through their [`JobContext`], and the scheduling
//! center reads it back incrementally by line number.
//!
//! Log writes are best effort: an IO failure is logged and never fails the
//! job that produced it.
//!
//! [`JobContext`]: crate::handler::JobContext

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::LogId;

const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

/// Retention below this many days disables cleanup entirely.
pub const MIN_RETENTION_DAYS: u32 = 3;

/// Name of the directory holding script sources, under the log base.
pub const GLUE_SOURCE_DIR: &str = "glue-source";

/// Name of the directory holding undelivered callback batches, under the log base.
pub const CALLBACK_LOG_DIR: &str = "callback-log";

/// A window of a trigger's log, as returned to the scheduling center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResult {
    pub from_line_num: u32,
    pub to_line_num: u32,
    pub log_content: String,
    pub is_end: bool,
}

/// File-backed store for trigger logs.
#[derive(Debug, Clone)]
pub struct JobLogStore {
    base: PathBuf,
}

impl JobLogStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        JobLogStore { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn glue_source_dir(&self) -> PathBuf {
        self.base.join(GLUE_SOURCE_DIR)
    }

    pub fn callback_log_dir(&self) -> PathBuf {
        self.base.join(CALLBACK_LOG_DIR)
    }

    /// Creates the base, glue-source and callback-log directories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base)?;
        fs::create_dir_all(self.glue_source_dir())?;
        fs::create_dir_all(self.callback_log_dir())?;
        Ok(())
    }

    /// Path of the log file for a trigger fired at `log_timestamp` (unix millis).
    pub fn file_name_for(&self, log_timestamp: i64, log_id: LogId) -> PathBuf {
        let date = DateTime::<Utc>::from_timestamp_millis(log_timestamp)
            .unwrap_or_default()
            .date_naive();
        self.base
            .join(date.format(DATE_DIR_FORMAT).to_string())
            .join(format!("{log_id}.log"))
    }

    /// Appends one line to `path`, creating the file and its date directory
    /// as needed.
    pub fn append(&self, path: &Path, text: &str) {
        if let Err(e) = append_line(path, text) {
            warn!(path = %path.display(), error = %e, "failed to append job log");
        }
    }

    /// Reads the trigger's log starting at line `from_line` (1-based).
    ///
    /// A missing file is reported in the content with `is_end` set, so the
    /// caller stops polling.
    pub fn read_log(&self, log_timestamp: i64, log_id: LogId, from_line: u32) -> LogResult {
        let path = self.file_name_for(log_timestamp, log_id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return LogResult {
                    from_line_num: from_line,
                    to_line_num: 0,
                    log_content: format!("log file not found: {}", path.display()),
                    is_end: true,
                };
            }
            Err(e) => return read_failure(from_line, 0, &path, e),
        };

        let mut content = String::new();
        let mut to_line = 0;
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => return read_failure(from_line, to_line, &path, e),
            };
            to_line += 1;
            if to_line >= from_line {
                content.push_str(&line);
                content.push('\n');
            }
        }

        LogResult {
            from_line_num: from_line,
            to_line_num: to_line,
            log_content: content,
            is_end: false,
        }
    }

    /// Removes date directories at least `retention_days` old relative to
    /// `today`. Returns the number of directories removed.
    ///
    /// Directories whose names are not dates (glue sources, the callback
    /// spool) are never touched.
    pub fn cleanup_expired(&self, retention_days: u32, today: NaiveDate) -> usize {
        if retention_days < MIN_RETENTION_DAYS {
            return 0;
        }

        let entries = match fs::read_dir(&self.base) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %self.base.display(), error = %e, "cannot list job log directory");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(date) = name
                .to_str()
                .and_then(|n| NaiveDate::parse_from_str(n, DATE_DIR_FORMAT).ok())
            else {
                continue;
            };
            if (today - date).num_days() < i64::from(retention_days) {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "removed expired job logs");
                    removed += 1;
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove expired job logs"),
            }
        }
        removed
    }
}

fn append_line(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{text}")
}

fn read_failure(from_line: u32, to_line: u32, path: &Path, e: io::Error) -> LogResult {
    warn!(path = %path.display(), error = %e, "failed to read job log");
    LogResult {
        from_line_num: from_line,
        to_line_num: to_line,
        log_content: format!("failed to read log: {e}"),
        is_end: true,
    }
}

/// Runs [`JobLogStore::cleanup_expired`] once a day until cancelled.
pub async fn run_retention(store: JobLogStore, retention_days: u32, cancel: CancellationToken) {
    if retention_days < MIN_RETENTION_DAYS {
        debug!(retention_days, "job log retention disabled");
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = store.cleanup_expired(retention_days, Utc::now().date_naive());
                if removed > 0 {
                    info!(removed, retention_days, "cleaned expired job logs");
                }
            }
        }
    }
}
