//! Per-execution context handed to a [`JobHandler`](super::JobHandler).
//!
//! A fresh context is built for every dequeued trigger and passed to the
//! handler by reference. It carries the trigger's parameters, a handle to
//! the trigger's log file and the slot the handler writes its result into.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::joblog::JobLogStore;
use crate::types::{ExecutionResult, JobId, LogId, TriggerRequest};

#[derive(Debug)]
pub struct JobContext {
    job_id: JobId,
    log_id: LogId,
    params: Option<String>,
    shard_index: i32,
    shard_total: i32,
    log_path: PathBuf,
    log_store: JobLogStore,
    result: Mutex<Option<ExecutionResult>>,
}

impl JobContext {
    pub fn new(trigger: &TriggerRequest, log_store: JobLogStore) -> Self {
        JobContext {
            job_id: trigger.job_id,
            log_id: trigger.log_id,
            params: trigger.params.clone(),
            shard_index: trigger.broadcast_index,
            shard_total: trigger.broadcast_total,
            log_path: log_store.file_name_for(trigger.log_timestamp, trigger.log_id),
            log_store,
            result: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Raw job parameters, if the trigger carried any.
    pub fn params(&self) -> Option<&str> {
        self.params.as_deref()
    }

    pub fn shard_index(&self) -> i32 {
        self.shard_index
    }

    pub fn shard_total(&self) -> i32 {
        self.shard_total
    }

    /// Path of this trigger's log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Appends a timestamped line to the trigger's log.
    pub fn log(&self, text: impl AsRef<str>) {
        let line = format!(
            "{} [job {}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            self.job_id,
            text.as_ref()
        );
        self.log_store.append(&self.log_path, &line);
    }

    pub fn handle_success(&self, msg: Option<String>) {
        self.set_result(ExecutionResult::success(msg));
    }

    pub fn handle_fail(&self, msg: impl Into<String>) {
        self.set_result(ExecutionResult::fail(msg));
    }

    pub fn handle_timeout(&self, msg: impl Into<String>) {
        self.set_result(ExecutionResult::timeout(msg));
    }

    /// Overwrites the recorded result. The last call wins.
    pub fn set_result(&self, result: ExecutionResult) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    /// Takes the recorded result, leaving the slot empty.
    pub fn take_result(&self) -> Option<ExecutionResult> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
