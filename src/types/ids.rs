//! Newtype identifiers used throughout the executor.
//!
//! Job ids and log ids are both plain integers on the wire. Wrapping them
//! keeps a log id from ever being used where a job id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a job definition in the scheduling center.
///
/// One worker exists per active job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(n: i64) -> Self {
        JobId(n)
    }
}

/// Identifier of a single trigger (one execution attempt of a job).
///
/// Unique per trigger; used to deduplicate queued work and to name the
/// trigger's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub i64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LogId {
    fn from(n: i64) -> Self {
        LogId(n)
    }
}
