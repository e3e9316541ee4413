//! Execution outcomes and the callback records that report them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::LogId;
use super::trigger::TriggerRequest;

/// Maximum length of a handle message, in characters.
pub const HANDLE_MSG_MAX_LENGTH: usize = 50_000;

const TRUNCATION_MARKER: &str = "...";

/// Outcome code reported to the scheduling center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum HandleCode {
    Success,
    Fail,
    Timeout,
}

impl HandleCode {
    pub fn code(self) -> i32 {
        match self {
            HandleCode::Success => 200,
            HandleCode::Fail => 500,
            HandleCode::Timeout => 502,
        }
    }
}

impl From<HandleCode> for i32 {
    fn from(code: HandleCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for HandleCode {
    type Error = String;

    fn try_from(n: i32) -> Result<Self, Self::Error> {
        match n {
            200 => Ok(HandleCode::Success),
            500 => Ok(HandleCode::Fail),
            502 => Ok(HandleCode::Timeout),
            other => Err(format!("unknown handle code {other}")),
        }
    }
}

impl fmt::Display for HandleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Result of one dequeued trigger. Produced exactly once per trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub code: HandleCode,
    pub msg: Option<String>,
}

impl ExecutionResult {
    pub fn success(msg: Option<String>) -> Self {
        ExecutionResult { code: HandleCode::Success, msg }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        ExecutionResult { code: HandleCode::Fail, msg: Some(msg.into()) }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ExecutionResult { code: HandleCode::Timeout, msg: Some(msg.into()) }
    }

    /// Applies the message length cap.
    pub fn truncated(mut self) -> Self {
        self.msg = self.msg.map(truncate_msg);
        self
    }
}

/// Cuts `msg` to [`HANDLE_MSG_MAX_LENGTH`] characters, appending `...` when
/// anything was removed.
pub fn truncate_msg(msg: String) -> String {
    match msg.char_indices().nth(HANDLE_MSG_MAX_LENGTH) {
        Some((byte_idx, _)) => {
            let mut cut = msg;
            cut.truncate(byte_idx);
            cut.push_str(TRUNCATION_MARKER);
            cut
        }
        None => msg,
    }
}

/// Wire-level result notification sent to the scheduling center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRecord {
    #[serde(rename = "logId")]
    pub log_id: LogId,

    /// Trigger time in unix milliseconds. The wire name is historical.
    #[serde(rename = "logDateTim")]
    pub log_timestamp: i64,

    #[serde(rename = "handleCode")]
    pub handle_code: HandleCode,

    #[serde(rename = "handleMsg")]
    pub handle_msg: Option<String>,
}

impl CallbackRecord {
    pub fn new(log_id: LogId, log_timestamp: i64, result: ExecutionResult) -> Self {
        CallbackRecord {
            log_id,
            log_timestamp,
            handle_code: result.code,
            handle_msg: result.msg,
        }
    }

    /// Builds the record reporting `result` for `trigger`.
    pub fn for_trigger(trigger: &TriggerRequest, result: ExecutionResult) -> Self {
        Self::new(trigger.log_id, trigger.log_timestamp, result)
    }
}
