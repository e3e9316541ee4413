//! Trigger dispatch: routing each incoming trigger to its job's worker.
//!
//! For every trigger the dispatcher resolves the handler the trigger asks
//! for, decides whether the job's current worker can be reused, applies the
//! trigger's block strategy, and finally queues the trigger.
//!
//! # Architecture
//!
//! ```text
//!                                       ┌──────────────────────────┐
//!                                  ┌──► │ job 1 queue (FIFO)       │ ──► worker 1
//! ┌───────────┐    ┌──────────┐    │    └──────────────────────────┘
//! │ transport │ ─► │ dispatch │ ───┤
//! └───────────┘    │  by job  │    │    ┌──────────────────────────┐
//!       ▲          └──────────┘    └──► │ job 2 queue (FIFO)       │ ──► worker 2
//!       │ accepted / rejected           └──────────────────────────┘
//! ```
//!
//! # Replacement
//!
//! A worker is replaced when the handler identity changes, when the glue
//! version moves, or when `COVER_EARLY` finds it busy. The sequence is:
//! start the new worker, swap it into the registry, then stop the old one.
//! Dispatch and kill calls are serialised, so no other call ever observes
//! the registry mid-replacement.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::handler::{CompileError, GlueCompiler, HandlerKind, JobHandler, ScriptJobHandler};
use crate::types::{BlockStrategy, GlueType, JobId, LogId, TriggerRequest};

use super::registry::Registry;
use super::worker::{JobWorker, PushError, WorkerDeps};

pub const CHANGE_HANDLER_REASON: &str = "change job handler or glue type, and terminate the old job thread.";
pub const CHANGE_SOURCE_REASON: &str = "change job source or glue type, and terminate the old job thread.";
pub const COVER_EARLY_REASON: &str = "block strategy effect：Cover Early";
pub const KILL_REASON: &str = "scheduling center kill job.";
pub const SHUTDOWN_REASON: &str = "web container destroy and kill the job.";

/// Why a trigger was rejected. Returned synchronously to the caller; none
/// of these ever produce a callback.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job handler [{0}] not found.")]
    HandlerNotFound(String),

    #[error("glue compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("glueType[{0}] is not valid.")]
    InvalidGlueType(String),

    #[error("block strategy effect：{}", BlockStrategy::DiscardLater.title())]
    BlockedDiscarded,

    #[error("repeat trigger job, logId:{0}")]
    DuplicateTrigger(LogId),

    /// The target worker stopped between lookup and push.
    #[error("job worker is stopped")]
    WorkerClosed,
}

impl DispatchError {
    /// Status code reported to the scheduling center.
    pub fn code(&self) -> i32 {
        match self {
            DispatchError::HandlerNotFound(_) => 404,
            _ => 500,
        }
    }
}

impl From<PushError> for DispatchError {
    fn from(e: PushError) -> Self {
        match e {
            PushError::Duplicate(log_id) => DispatchError::DuplicateTrigger(log_id),
            PushError::Closed => DispatchError::WorkerClosed,
        }
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Routes triggers to per-job workers.
///
/// One dispatcher exists per executor. It owns the glue compiler and shares
/// the registry with every worker it starts.
pub struct Dispatcher {
    registry: Arc<Registry>,
    glue: GlueCompiler,
    deps: WorkerDeps,
    /// Serialises dispatch, kill and shutdown.
    lock: Mutex<()>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `glue` - Compiler used for `GLUE_GROOVY` triggers
    /// * `deps` - Handed to every worker this dispatcher starts; its
    ///   registry is the one dispatch reads and updates
    pub fn new(glue: GlueCompiler, deps: WorkerDeps) -> Self {
        Dispatcher {
            registry: Arc::clone(&deps.registry),
            glue,
            deps,
            lock: Mutex::new(()),
        }
    }

    /// The handler and worker tables this dispatcher manages.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Routes `trigger` to its job's worker, creating or replacing the
    /// worker as needed.
    #[instrument(skip(self, trigger), fields(job_id = %trigger.job_id, log_id = %trigger.log_id))]
    pub async fn dispatch(&self, trigger: TriggerRequest) -> Result<()> {
        let _guard = self.lock.lock().await;
        match self.dispatch_locked(&trigger) {
            // Lost a race with idle eviction; the slot is empty now.
            Err(DispatchError::WorkerClosed) => {
                debug!("worker evicted during dispatch, retrying");
                self.dispatch_locked(&trigger)
            }
            other => other,
        }
    }

    fn dispatch_locked(&self, trigger: &TriggerRequest) -> Result<()> {
        let glue_type = trigger
            .glue()
            .ok_or_else(|| DispatchError::InvalidGlueType(trigger.glue_type.clone()))?;

        let mut current = self.registry.lookup_worker(trigger.job_id);
        let mut replace_reason: Option<&'static str> = None;

        let handler: Arc<dyn JobHandler> = match glue_type {
            GlueType::Bean => {
                let name = trigger.handler_name.clone().unwrap_or_default();
                let registered = self.registry.lookup_handler(&name);
                if let Some(worker) = &current {
                    let same = registered
                        .as_ref()
                        .is_some_and(|h| Arc::ptr_eq(h, worker.handler()));
                    if !same {
                        replace_reason = Some(CHANGE_HANDLER_REASON);
                        current = None;
                    }
                }
                match &current {
                    Some(worker) => Arc::clone(worker.handler()),
                    None => registered.ok_or(DispatchError::HandlerNotFound(name))?,
                }
            }
            GlueType::Groovy => {
                let wanted = HandlerKind::Glue { version: trigger.glue_version };
                if current.as_ref().is_some_and(|w| w.handler().kind() != wanted) {
                    replace_reason = Some(CHANGE_SOURCE_REASON);
                    current = None;
                }
                match &current {
                    Some(worker) => Arc::clone(worker.handler()),
                    None => self
                        .glue
                        .compile(trigger.glue_source.as_deref().unwrap_or_default(), trigger.glue_version)?,
                }
            }
            script => {
                let wanted = HandlerKind::Script { glue_type: script, version: trigger.glue_version };
                if current.as_ref().is_some_and(|w| w.handler().kind() != wanted) {
                    replace_reason = Some(CHANGE_SOURCE_REASON);
                    current = None;
                }
                match &current {
                    Some(worker) => Arc::clone(worker.handler()),
                    None => {
                        let script_handler = ScriptJobHandler::new(
                            trigger.job_id,
                            script,
                            trigger.glue_version,
                            trigger.glue_source.clone().unwrap_or_default(),
                            &self.deps.log_store.glue_source_dir(),
                        )
                        .ok_or_else(|| DispatchError::InvalidGlueType(trigger.glue_type.clone()))?;
                        Arc::new(script_handler) as Arc<dyn JobHandler>
                    }
                }
            }
        };

        if let Some(worker) = &current {
            match trigger.strategy() {
                BlockStrategy::DiscardLater if worker.is_running_or_has_queue() => {
                    return Err(DispatchError::BlockedDiscarded);
                }
                BlockStrategy::CoverEarly if worker.is_running_or_has_queue() => {
                    replace_reason = Some(COVER_EARLY_REASON);
                    current = None;
                }
                _ => {}
            }
        }

        let worker = match current {
            Some(worker) => worker,
            None => self.replace_worker(trigger.job_id, handler, replace_reason),
        };
        worker.push(trigger.clone())?;
        Ok(())
    }

    fn replace_worker(&self, job_id: JobId, handler: Arc<dyn JobHandler>, reason: Option<&str>) -> Arc<JobWorker> {
        let worker = JobWorker::start(job_id, handler, self.deps.clone());
        if let Some(old) = self.registry.register_worker(job_id, Arc::clone(&worker)) {
            let reason = reason.unwrap_or(CHANGE_HANDLER_REASON);
            info!(job_id = %job_id, reason, "replacing job worker");
            old.stop(reason);
        }
        worker
    }

    /// Removes and stops the job's worker. Returns false if there was none.
    #[instrument(skip(self))]
    pub async fn kill(&self, job_id: JobId) -> bool {
        let _guard = self.lock.lock().await;
        self.registry.remove_worker(job_id, KILL_REASON).is_some()
    }

    /// True when the job has no worker or its worker is neither running
    /// nor holding queued triggers.
    pub fn idle_beat(&self, job_id: JobId) -> bool {
        self.registry
            .lookup_worker(job_id)
            .is_none_or(|w| !w.is_running_or_has_queue())
    }

    /// Stops every worker, waits for them to drain, then clears the handler
    /// table.
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        self.registry
            .shutdown_workers(SHUTDOWN_REASON, self.deps.config.join_timeout)
            .await;
        self.registry.clear_handlers();
    }
}
