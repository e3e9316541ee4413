//! Endpoints the scheduling center calls on the executor.
//!
//! Every endpoint answers HTTP 200 with an [`ApiResponse`] body; success or
//! rejection is carried in the body's `code`.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::joblog::LogResult;
use crate::types::{ApiResponse, JobId, LogId, TriggerRequest};

use super::AppState;

pub const BUSY_MSG: &str = "job thread is running or has trigger queue.";
pub const ALREADY_KILLED_MSG: &str = "job thread already killed.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleBeatParam {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillParam {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParam {
    #[serde(rename = "logDateTim")]
    pub log_timestamp: i64,
    pub log_id: LogId,
    #[serde(default = "first_line")]
    pub from_line_num: u32,
}

fn first_line() -> u32 {
    1
}

/// Liveness check from the scheduling center. Always succeeds.
pub async fn beat_handler() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success(None))
}

/// Reports whether the job's worker is free to take a trigger right now.
///
/// Used by the scheduling center's busy-over routing to skip executors
/// that are still working on the job.
pub async fn idle_beat_handler(
    State(app_state): State<AppState>,
    Json(param): Json<IdleBeatParam>,
) -> Json<ApiResponse<String>> {
    if app_state.dispatcher().idle_beat(param.job_id) {
        Json(ApiResponse::success(None))
    } else {
        debug!(job_id = %param.job_id, "idle beat: job busy");
        Json(ApiResponse::fail(BUSY_MSG))
    }
}

/// Accepts a trigger for execution, or reports why it was rejected.
pub async fn run_handler(
    State(app_state): State<AppState>,
    Json(trigger): Json<TriggerRequest>,
) -> Json<ApiResponse<String>> {
    let job_id = trigger.job_id;
    let log_id = trigger.log_id;
    match app_state.dispatcher().dispatch(trigger).await {
        Ok(()) => Json(ApiResponse::success(None)),
        Err(e) => {
            warn!(job_id = %job_id, log_id = %log_id, error = %e, "trigger rejected");
            Json(ApiResponse::with_code(e.code(), e.to_string()))
        }
    }
}

/// Stops the job's worker, failing its running and queued triggers.
pub async fn kill_handler(
    State(app_state): State<AppState>,
    Json(param): Json<KillParam>,
) -> Json<ApiResponse<String>> {
    if app_state.dispatcher().kill(param.job_id).await {
        info!(job_id = %param.job_id, "job killed on request");
        Json(ApiResponse::success(None))
    } else {
        Json(ApiResponse::fail(ALREADY_KILLED_MSG))
    }
}

/// Returns the trigger's log from `fromLineNum` onwards.
///
/// The file read runs on the blocking pool.
pub async fn log_handler(
    State(app_state): State<AppState>,
    Json(param): Json<LogParam>,
) -> Json<ApiResponse<LogResult>> {
    let store = app_state.log_store().clone();
    let result = tokio::task::spawn_blocking(move || {
        store.read_log(param.log_timestamp, param.log_id, param.from_line_num)
    })
    .await;
    match result {
        Ok(log) => Json(ApiResponse::success(Some(log))),
        Err(e) => Json(ApiResponse::fail(format!("failed to read log: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_param_uses_wire_names() {
        let param: LogParam =
            serde_json::from_str(r#"{"logDateTim": 1700000000000, "logId": 9, "fromLineNum": 3}"#).unwrap();
        assert_eq!(param.log_timestamp, 1_700_000_000_000);
        assert_eq!(param.log_id, LogId(9));
        assert_eq!(param.from_line_num, 3);
    }

    #[test]
    fn log_param_defaults_to_first_line() {
        let param: LogParam = serde_json::from_str(r#"{"logDateTim": 0, "logId": 1}"#).unwrap();
        assert_eq!(param.from_line_num, 1);
    }

    #[test]
    fn kill_param_reads_job_id() {
        let param: KillParam = serde_json::from_str(r#"{"jobId": 12}"#).unwrap();
        assert_eq!(param.job_id, JobId(12));
    }
}
