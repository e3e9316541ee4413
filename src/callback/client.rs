//! Client side of the scheduling center's callback endpoint.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::types::{ApiResponse, CallbackRecord};

/// Default request timeout in seconds, used when the configured value is
/// out of range.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

const MAX_TIMEOUT_SECS: u64 = 10;

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-200 HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The configured address is not an absolute URL.
    #[error("invalid scheduling center address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The endpoint answered but refused the batch.
    #[error("callback rejected with code {code}: {}", msg.as_deref().unwrap_or(""))]
    Rejected { code: i32, msg: Option<String> },
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One scheduling-center endpoint able to accept callback batches.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Human-readable endpoint address, for logs.
    fn address(&self) -> &str;

    async fn callback(&self, batch: &[CallbackRecord]) -> Result<()>;
}

/// Posts callback batches as JSON to `<address>/api/callback`.
pub struct HttpSchedulerClient {
    address: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSchedulerClient {
    /// Builds a client for `address` with a request timeout clamped to
    /// 1..=10 seconds (out-of-range values fall back to 3).
    pub fn new(address: &str, timeout_secs: u64) -> Result<Self> {
        let address = normalize_address(address);
        let url = format!("{address}api/callback");
        if let Err(e) = reqwest::Url::parse(&url) {
            return Err(ClientError::InvalidAddress { address, reason: e.to_string() });
        }
        let timeout = clamp_timeout(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;
        Ok(HttpSchedulerClient {
            url,
            address,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn clamp_timeout(secs: u64) -> u64 {
    if (1..=MAX_TIMEOUT_SECS).contains(&secs) {
        secs
    } else {
        DEFAULT_TIMEOUT_SECS
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn callback(&self, batch: &[CallbackRecord]) -> Result<()> {
        let response = self.client.post(&self.url).json(batch).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        let body: ApiResponse<serde_json::Value> = response.json().await?;
        if !body.is_success() {
            return Err(ClientError::Rejected { code: body.code, msg: body.msg });
        }
        debug!(url = %self.url, records = batch.len(), "callback accepted");
        Ok(())
    }
}
