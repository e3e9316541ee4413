//! Worker loop timing.
//!
//! A worker waits on its queue for at most `poll_interval` at a time. Each
//! empty wait counts towards `idle_limit`; once exceeded with the queue
//! still empty, the worker evicts itself.
//!
//! - **Poll interval**: 3 seconds by default (`JOB_EXECUTOR_POLL_INTERVAL_MS`)
//! - **Idle limit**: 30 empty polls by default (`JOB_EXECUTOR_IDLE_LIMIT`)

use std::time::Duration;

use crate::config::parse_var;

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_IDLE_LIMIT: u32 = 30;
/// How long shutdown waits for one worker to finish its current job.
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Longest single wait on an empty queue.
    pub poll_interval: Duration,

    /// Empty polls tolerated before idle eviction.
    pub idle_limit: u32,

    /// Upper bound on waiting for a stopped worker to exit.
    pub join_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            idle_limit: DEFAULT_IDLE_LIMIT,
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
        }
    }

    /// Reads overrides through `lookup` (normally the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "JOB_EXECUTOR_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            idle_limit: parse_var(&lookup, "JOB_EXECUTOR_IDLE_LIMIT", DEFAULT_IDLE_LIMIT),
            ..Self::new()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_idle_limit(mut self, idle_limit: u32) -> Self {
        self.idle_limit = idle_limit;
        self
    }
}
