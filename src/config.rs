//! Executor configuration read from `JOB_EXECUTOR_*` environment variables.
//!
//! Unset variables take their defaults. A value that does not parse also
//! falls back to the default, with a warning.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::callback::DEFAULT_RETRY_INTERVAL;
use crate::callback::client::DEFAULT_TIMEOUT_SECS;
use crate::worker::WorkerConfig;

const DEFAULT_LOG_PATH: &str = "./data/job-logs";
const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Scheduling-center base URLs, tried in order for every callback batch.
    pub admin_addresses: Vec<String>,

    pub listen_addr: SocketAddr,

    /// Root of trigger logs, glue sources and the callback spool.
    pub log_path: PathBuf,

    /// Days of trigger logs to keep; below 3 disables cleanup.
    pub log_retention_days: u32,

    pub callback_timeout_secs: u64,

    pub callback_retry_interval: Duration,

    pub worker: WorkerConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_listen = SocketAddr::from(([0, 0, 0, 0], 9999));
        let admin_addresses = lookup("JOB_EXECUTOR_ADMIN_ADDRESSES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        ExecutorConfig {
            admin_addresses,
            listen_addr: parse_var(&lookup, "JOB_EXECUTOR_LISTEN_ADDR", default_listen),
            log_path: lookup("JOB_EXECUTOR_LOG_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            log_retention_days: parse_var(&lookup, "JOB_EXECUTOR_LOG_RETENTION_DAYS", DEFAULT_LOG_RETENTION_DAYS),
            callback_timeout_secs: parse_var(&lookup, "JOB_EXECUTOR_CALLBACK_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
            callback_retry_interval: retry_interval(&lookup),
            worker: WorkerConfig::from_lookup(&lookup),
        }
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    pub fn with_admin_addresses(mut self, addresses: Vec<String>) -> Self {
        self.admin_addresses = addresses;
        self
    }
}

/// The retry pass needs a non-zero period; zero is treated like a bad value.
fn retry_interval(lookup: &impl Fn(&str) -> Option<String>) -> Duration {
    let secs = parse_var(lookup, "JOB_EXECUTOR_CALLBACK_RETRY_SECS", DEFAULT_RETRY_INTERVAL.as_secs());
    if secs == 0 {
        warn!(var = "JOB_EXECUTOR_CALLBACK_RETRY_SECS", "retry interval must be positive, using default");
        return DEFAULT_RETRY_INTERVAL;
    }
    Duration::from_secs(secs)
}

/// Parses variable `name` via `lookup`, falling back to `default` when it is
/// unset or malformed.
pub(crate) fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "unparseable value, using default");
                default
            }
        },
    }
}
