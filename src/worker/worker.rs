//! Per-job execution loop.
//!
//! Each active job gets a dedicated worker task that owns the job's handler
//! and executes its triggers one at a time, in arrival order.
//!
//! # Lifecycle
//!
//! 1. `init()` on the handler (failure is logged, the loop still starts)
//! 2. Wait on the queue for at most the poll interval
//! 3. Execute the popped trigger in a child task, bounded by its timeout
//! 4. Push exactly one callback record for it, whatever the outcome
//! 5. Loop until stopped or idle for longer than the idle limit
//! 6. Fail every trigger still queued with the stop reason, then `destroy()`
//!
//! # Stopping
//!
//! [`JobWorker::stop`] closes the queue under the same lock that guards
//! pushes, so every trigger either lands before the close (and is reported
//! by the final drain) or is refused with [`PushError::Closed`].

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callback::CallbackSender;
use crate::handler::{JobContext, JobHandler};
use crate::joblog::JobLogStore;
use crate::types::{CallbackRecord, ExecutionResult, JobId, LogId, TriggerRequest};

use super::config::WorkerConfig;
use super::queue::TriggerQueue;
use super::registry::Registry;

pub const TIMEOUT_MSG: &str = "job execute timeout ";
pub const RESULT_LOST_MSG: &str = "job handle result lost.";
pub const IDLE_REASON: &str = "executor idle times over limit.";

/// Why a trigger could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    /// A trigger with this log id is already waiting.
    #[error("repeat trigger job, logId:{0}")]
    Duplicate(LogId),

    /// The worker has been stopped.
    #[error("job worker is stopped")]
    Closed,
}

/// Everything a worker needs from the rest of the executor.
#[derive(Clone)]
pub struct WorkerDeps {
    pub config: WorkerConfig,
    pub log_store: JobLogStore,
    pub callbacks: CallbackSender,
    pub registry: Arc<Registry>,
}

#[derive(Debug, Default)]
struct WorkerState {
    queue: TriggerQueue,
    running: bool,
    closed: bool,
    stop_reason: Option<String>,
}

pub struct JobWorker {
    job_id: JobId,
    handler: Arc<dyn JobHandler>,
    state: Mutex<WorkerState>,
    wakeup: Notify,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobWorker {
    /// Creates the worker and spawns its loop.
    pub fn start(job_id: JobId, handler: Arc<dyn JobHandler>, deps: WorkerDeps) -> Arc<Self> {
        let worker = Arc::new(JobWorker {
            job_id,
            handler,
            state: Mutex::new(WorkerState::default()),
            wakeup: Notify::new(),
            stop: CancellationToken::new(),
            task: Mutex::new(None),
        });
        let task = tokio::spawn(Arc::clone(&worker).run(deps));
        *worker.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        info!(job_id = %job_id, "job worker started");
        worker
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a trigger behind any already waiting.
    pub fn push(&self, trigger: TriggerRequest) -> Result<(), PushError> {
        let log_id = trigger.log_id;
        {
            let mut state = self.state();
            if state.closed {
                return Err(PushError::Closed);
            }
            if !state.queue.push(trigger) {
                return Err(PushError::Duplicate(log_id));
            }
        }
        self.wakeup.notify_one();
        Ok(())
    }

    /// True while a trigger is executing or waiting.
    pub fn is_running_or_has_queue(&self) -> bool {
        let state = self.state();
        state.running || !state.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.state().stop_reason.clone()
    }

    /// Signals the worker to stop. The first reason given is kept.
    ///
    /// A running execution is cancelled and reported as killed; queued
    /// triggers are failed with `reason` by the loop's final drain.
    pub fn stop(&self, reason: &str) {
        {
            let mut state = self.state();
            state.closed = true;
            state.stop_reason.get_or_insert_with(|| reason.to_string());
        }
        self.stop.cancel();
        self.wakeup.notify_one();
    }

    /// Closes the queue if nothing is running or waiting. Used for idle
    /// eviction, under the registry lock.
    pub(crate) fn close_if_idle(&self) -> bool {
        let mut state = self.state();
        if state.running || !state.queue.is_empty() {
            return false;
        }
        state.closed = true;
        true
    }

    /// Waits up to `timeout` for the loop to exit, aborting it otherwise.
    ///
    /// Returns false if the loop had to be aborted.
    pub async fn join(&self, timeout: Duration) -> bool {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut task) = task else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(job_id = %self.job_id, error = %e, "job worker task failed");
                true
            }
            Err(_) => {
                warn!(job_id = %self.job_id, "job worker did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }

    async fn run(self: Arc<Self>, deps: WorkerDeps) {
        if let Err(e) = self.handler.init().await {
            error!(job_id = %self.job_id, error = %e, "job handler init failed");
        }

        let mut idle_times: u32 = 0;
        while !self.stop.is_cancelled() {
            match self.next_trigger(deps.config.poll_interval).await {
                Some(trigger) => {
                    idle_times = 0;
                    self.execute(trigger, &deps).await;
                    self.state().running = false;
                }
                None => {
                    idle_times += 1;
                    if idle_times > deps.config.idle_limit
                        && deps.registry.remove_if_idle(self.job_id, &self)
                    {
                        debug!(job_id = %self.job_id, idle_times, "evicting idle job worker");
                        self.stop(IDLE_REASON);
                    }
                }
            }
        }

        let (drained, reason) = {
            let mut state = self.state();
            state.closed = true;
            (state.queue.drain(), state.stop_reason.clone().unwrap_or_default())
        };
        if !drained.is_empty() {
            info!(job_id = %self.job_id, count = drained.len(), reason = %reason, "failing queued triggers");
        }
        for trigger in drained {
            let msg = format!("{reason} [job not executed, in the job queue, killed.]");
            deps.callbacks
                .push(CallbackRecord::for_trigger(&trigger, ExecutionResult::fail(msg).truncated()));
        }

        if let Err(e) = self.handler.destroy().await {
            error!(job_id = %self.job_id, error = %e, "job handler destroy failed");
        }
        info!(job_id = %self.job_id, reason = %reason, "job worker stopped");
    }

    /// Pops the next trigger, waiting at most `wait`. Marks the worker
    /// running in the same critical section as the pop.
    async fn next_trigger(&self, wait: Duration) -> Option<TriggerRequest> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(trigger) = self.try_pop() {
                return Some(trigger);
            }
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = self.stop.cancelled() => return None,
                _ = tokio::time::sleep_until(deadline) => return self.try_pop(),
            }
        }
    }

    fn try_pop(&self) -> Option<TriggerRequest> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        let trigger = state.queue.pop()?;
        state.running = true;
        Some(trigger)
    }

    async fn execute(&self, trigger: TriggerRequest, deps: &WorkerDeps) {
        let ctx = Arc::new(JobContext::new(&trigger, deps.log_store.clone()));
        ctx.log("----------- job execute start -----------");
        ctx.log(format!("----------- Param:{}", trigger.params.as_deref().unwrap_or_default()));
        debug!(job_id = %self.job_id, log_id = %trigger.log_id, "executing trigger");

        let handler = Arc::clone(&self.handler);
        let exec_ctx = Arc::clone(&ctx);
        let mut execution = tokio::spawn(async move { handler.execute(&exec_ctx).await });

        let deadline = u64::try_from(trigger.timeout_seconds)
            .ok()
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);
        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            joined = &mut execution => match joined {
                Ok(Ok(())) => ctx
                    .take_result()
                    .unwrap_or_else(|| ExecutionResult::fail(RESULT_LOST_MSG)),
                Ok(Err(e)) => ExecutionResult::fail(format!("job execute exception: {e}")),
                Err(e) => ExecutionResult::fail(format!("job execute exception: {}", join_error_text(e))),
            },
            _ = timer => {
                execution.abort();
                ctx.log("----------- job execute timeout");
                warn!(job_id = %self.job_id, log_id = %trigger.log_id, "job execution timed out");
                ExecutionResult::timeout(TIMEOUT_MSG)
            }
            _ = self.stop.cancelled() => {
                execution.abort();
                let reason = self.stop_reason().unwrap_or_default();
                ctx.log(format!("----------- job worker stopped, reason:{reason}"));
                ExecutionResult::fail(format!("{reason} [job running, killed]"))
            }
        }
        .truncated();

        ctx.log(format!(
            "----------- job execute end -----------<br>----------- Result: handleCode={}, handleMsg = {}",
            result.code,
            result.msg.as_deref().unwrap_or_default()
        ));
        deps.callbacks.push(CallbackRecord::for_trigger(&trigger, result));
    }
}

fn join_error_text(e: JoinError) -> String {
    if e.is_panic() {
        panic_text(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
