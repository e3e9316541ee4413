//! Job handlers: the business logic a trigger runs.
//!
//! A handler is a pluggable unit with an `init / execute / destroy`
//! lifecycle. Each worker owns exactly one handler and calls `init` before
//! its first execution and `destroy` after its last.
//!
//! Three kinds exist:
//! - bean handlers, registered under a stable name at startup
//! - glue handlers, compiled from source at trigger time (see [`glue`])
//! - script handlers, run through an external interpreter (see [`script`])
//!
//! The [`HandlerKind`] of a handler is its identity as far as dispatch is
//! concerned: a trigger can only reuse a worker whose handler has the same
//! identity as the one the trigger asks for.

pub mod context;
pub mod glue;
pub mod script;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::GlueType;

pub use context::JobContext;
pub use glue::{CompileError, GlueCompiler, GlueJobHandler, HandlerFactory, HandlerPrototype};
pub use script::ScriptJobHandler;

/// Errors raised by handler code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// IO error while running the handler.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    pub fn msg(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Identity of a handler for worker reuse decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Compiled into the executor; identity is the registered instance.
    Bean,
    /// Compiled from glue source of the given version.
    Glue { version: i64 },
    /// Script of the given type and version.
    Script { glue_type: GlueType, version: i64 },
}

/// Business logic executed for each trigger.
///
/// `execute` reports its outcome through the context's result setters.
/// Returning `Ok(())` without setting a result is treated as a failure.
/// Returning `Err` records the error text as a failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Called once before the worker's first execution.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()>;

    /// Called once after the worker's last execution.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Bean
    }
}
