//! Handlers compiled from glue source at trigger time.
//!
//! The executor does not ship a compiler. A [`HandlerFactory`] supplied at
//! startup turns source text into a [`HandlerPrototype`]; [`GlueCompiler`]
//! caches prototypes by content hash so an unchanged source is compiled once
//! even when its version stamp moves. Every worker still gets its own handler
//! instance from the prototype, so one worker's `destroy` never reaches a
//! handler another worker is running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::{HandlerKind, JobContext, JobHandler, Result};

/// Errors from compiling glue source.
#[derive(Debug, Error)]
pub enum CompileError {
    /// No factory is configured for dynamically compiled glue.
    #[error("no glue compiler configured")]
    Unsupported,

    /// The factory rejected the source.
    #[error("{0}")]
    Invalid(String),
}

/// A compiled glue source. Each call yields a fresh handler instance.
pub type HandlerPrototype = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

/// Compiles glue source into a reusable prototype.
pub trait HandlerFactory: Send + Sync {
    fn compile(&self, source: &str) -> std::result::Result<HandlerPrototype, CompileError>;
}

/// Content-addressed prototype cache in front of a [`HandlerFactory`].
pub struct GlueCompiler {
    factory: Option<Arc<dyn HandlerFactory>>,
    cache: Mutex<HashMap<String, HandlerPrototype>>,
}

impl GlueCompiler {
    /// Creates a compiler.
    ///
    /// # Arguments
    ///
    /// * `factory` - Compiles glue sources; `None` makes every glue trigger
    ///   fail with [`CompileError::Unsupported`]
    pub fn new(factory: Option<Arc<dyn HandlerFactory>>) -> Self {
        GlueCompiler {
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a new handler for `source`, tagged with the given glue version.
    ///
    /// The source is only compiled on a cache miss; the returned handler is
    /// always a new instance.
    pub fn compile(&self, source: &str, version: i64) -> std::result::Result<Arc<dyn JobHandler>, CompileError> {
        let factory = self.factory.as_ref().ok_or(CompileError::Unsupported)?;
        let key = source_digest(source);

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let prototype = match cached {
            Some(prototype) => {
                debug!(digest = %key, "glue cache hit");
                prototype
            }
            None => {
                let prototype = factory.compile(source)?;
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, Arc::clone(&prototype));
                prototype
            }
        };

        Ok(Arc::new(GlueJobHandler::new(prototype(), version)))
    }

    /// Number of distinct sources compiled so far.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// A compiled glue handler tagged with the glue version it came from.
pub struct GlueJobHandler {
    inner: Arc<dyn JobHandler>,
    version: i64,
}

impl GlueJobHandler {
    pub fn new(inner: Arc<dyn JobHandler>, version: i64) -> Self {
        GlueJobHandler { inner, version }
    }
}

#[async_trait]
impl JobHandler for GlueJobHandler {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        ctx.log(format!("----------- glue.version:{} -----------", self.version));
        self.inner.execute(ctx).await
    }

    async fn destroy(&self) -> Result<()> {
        self.inner.destroy().await
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Glue { version: self.version }
    }
}
