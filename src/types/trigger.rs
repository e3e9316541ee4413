//! Incoming trigger requests and the enums they carry.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{JobId, LogId};

/// How a job's code is supplied.
///
/// `Bean` handlers are compiled into the executor and looked up by name.
/// `Groovy` source is compiled at trigger time by a [`HandlerFactory`].
/// The remaining variants are scripts run through an external interpreter.
///
/// [`HandlerFactory`]: crate::handler::HandlerFactory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlueType {
    Bean,
    Groovy,
    Shell,
    Python,
    Php,
    NodeJs,
    PowerShell,
}

impl GlueType {
    /// Parses the wire name. Unknown names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "BEAN" => Some(GlueType::Bean),
            "GLUE_GROOVY" => Some(GlueType::Groovy),
            "GLUE_SHELL" => Some(GlueType::Shell),
            "GLUE_PYTHON" => Some(GlueType::Python),
            "GLUE_PHP" => Some(GlueType::Php),
            "GLUE_NODEJS" => Some(GlueType::NodeJs),
            "GLUE_POWERSHELL" => Some(GlueType::PowerShell),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            GlueType::Bean => "BEAN",
            GlueType::Groovy => "GLUE_GROOVY",
            GlueType::Shell => "GLUE_SHELL",
            GlueType::Python => "GLUE_PYTHON",
            GlueType::Php => "GLUE_PHP",
            GlueType::NodeJs => "GLUE_NODEJS",
            GlueType::PowerShell => "GLUE_POWERSHELL",
        }
    }

    /// True for types executed by an external interpreter process.
    pub fn is_script(&self) -> bool {
        self.interpreter().is_some()
    }

    /// Interpreter command for script types.
    pub fn interpreter(&self) -> Option<&'static str> {
        match self {
            GlueType::Shell => Some("bash"),
            GlueType::Python => Some("python"),
            GlueType::Php => Some("php"),
            GlueType::NodeJs => Some("node"),
            GlueType::PowerShell => Some("powershell"),
            GlueType::Bean | GlueType::Groovy => None,
        }
    }

    /// File suffix used when writing script source to disk.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            GlueType::Shell => Some(".sh"),
            GlueType::Python => Some(".py"),
            GlueType::Php => Some(".php"),
            GlueType::NodeJs => Some(".js"),
            GlueType::PowerShell => Some(".ps1"),
            GlueType::Bean | GlueType::Groovy => None,
        }
    }
}

impl fmt::Display for GlueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Policy applied when a trigger arrives while the job is still busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockStrategy {
    /// Queue behind the running execution.
    #[default]
    SerialExecution,
    /// Reject the new trigger.
    DiscardLater,
    /// Kill the busy worker and run the new trigger on a fresh one.
    CoverEarly,
}

impl BlockStrategy {
    /// Parses the wire name, falling back to serial execution for anything
    /// unrecognised or missing.
    pub fn from_wire(name: Option<&str>) -> Self {
        match name {
            Some("DISCARD_LATER") => BlockStrategy::DiscardLater,
            Some("COVER_EARLY") => BlockStrategy::CoverEarly,
            _ => BlockStrategy::SerialExecution,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            BlockStrategy::SerialExecution => "Serial execution",
            BlockStrategy::DiscardLater => "Discard Later",
            BlockStrategy::CoverEarly => "Cover Early",
        }
    }
}

/// A single request to execute one job instance.
///
/// Field names on the wire follow the scheduling center's JSON protocol.
/// Enum-valued fields are kept as raw strings so an unknown glue type can be
/// reported as a rejection instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: JobId,

    #[serde(rename = "executorHandler", default)]
    pub handler_name: Option<String>,

    #[serde(rename = "executorParams", default)]
    pub params: Option<String>,

    #[serde(rename = "executorBlockStrategy", default)]
    pub block_strategy: Option<String>,

    /// Execution deadline in seconds; zero or negative means none.
    #[serde(rename = "executorTimeout", default)]
    pub timeout_seconds: i32,

    pub log_id: LogId,

    /// Trigger time in unix milliseconds.
    #[serde(rename = "logDateTime", default)]
    pub log_timestamp: i64,

    #[serde(default)]
    pub glue_type: String,

    #[serde(default)]
    pub glue_source: Option<String>,

    /// Monotonic version of the glue source (its last update time).
    #[serde(rename = "glueUpdateTime", alias = "glueUpdatetime", default)]
    pub glue_version: i64,

    #[serde(default)]
    pub broadcast_index: i32,

    #[serde(default)]
    pub broadcast_total: i32,
}

impl TriggerRequest {
    /// Builds a bean trigger with every optional field at its default.
    pub fn bean(job_id: JobId, log_id: LogId, handler_name: impl Into<String>) -> Self {
        TriggerRequest {
            job_id,
            handler_name: Some(handler_name.into()),
            params: None,
            block_strategy: None,
            timeout_seconds: 0,
            log_id,
            log_timestamp: 0,
            glue_type: GlueType::Bean.as_wire().to_string(),
            glue_source: None,
            glue_version: 0,
            broadcast_index: 0,
            broadcast_total: 1,
        }
    }

    pub fn with_block_strategy(mut self, strategy: &str) -> Self {
        self.block_strategy = Some(strategy.to_string());
        self
    }

    pub fn with_timeout(mut self, seconds: i32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_glue(mut self, glue_type: GlueType, source: impl Into<String>, version: i64) -> Self {
        self.glue_type = glue_type.as_wire().to_string();
        self.glue_source = Some(source.into());
        self.glue_version = version;
        self
    }

    /// Parsed glue type, `None` when the wire value is unknown.
    pub fn glue(&self) -> Option<GlueType> {
        GlueType::from_wire(&self.glue_type)
    }

    pub fn strategy(&self) -> BlockStrategy {
        BlockStrategy::from_wire(self.block_strategy.as_deref())
    }
}
