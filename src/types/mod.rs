//! Core domain types for the job executor.
//!
//! Identifiers, trigger requests and execution results shared by the
//! dispatcher, the workers and the callback subsystem.

pub mod ids;
pub mod response;
pub mod result;
pub mod trigger;

pub use ids::{JobId, LogId};
pub use response::{ApiResponse, FAIL_CODE, SUCCESS_CODE};
pub use result::{CallbackRecord, ExecutionResult, HANDLE_MSG_MAX_LENGTH, HandleCode, truncate_msg};
pub use trigger::{BlockStrategy, GlueType, TriggerRequest};
