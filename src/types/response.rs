//! The `{code, msg, content}` envelope used by both sides of the protocol.

use serde::{Deserialize, Serialize};

pub const SUCCESS_CODE: i32 = 200;
pub const FAIL_CODE: i32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: Option<String>,
    pub content: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(content: Option<T>) -> Self {
        ApiResponse { code: SUCCESS_CODE, msg: None, content }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self::with_code(FAIL_CODE, msg)
    }

    pub fn with_code(code: i32, msg: impl Into<String>) -> Self {
        ApiResponse { code, msg: Some(msg.into()), content: None }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}
