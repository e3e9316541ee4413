//! Lookup tables for handlers and live workers.
//!
//! The registry is owned by the runtime and shared with the dispatcher and
//! every worker. The job-id table is the single place where a worker becomes
//! visible to dispatch: swapping an entry is the linearization point of a
//! worker replacement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use crate::handler::JobHandler;
use crate::types::JobId;

use super::worker::JobWorker;

/// Bean handlers by name and live workers by job id.
///
/// Both tables sit behind std locks held only for the duration of a map
/// operation, never across an `.await`.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    workers: Mutex<HashMap<JobId, Arc<JobWorker>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobWorker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a bean handler under `name`, returning the one it replaced.
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Option<Arc<dyn JobHandler>> {
        let name = name.into();
        info!(name = %name, "registered job handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handler)
    }

    /// Returns the bean handler registered under `name`, if any.
    pub fn lookup_handler(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered handler names, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drops every registered handler. Used on shutdown.
    pub fn clear_handlers(&self) {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Installs `worker` for `job_id`, returning the displaced worker.
    ///
    /// The caller is responsible for stopping whatever is returned.
    pub fn register_worker(&self, job_id: JobId, worker: Arc<JobWorker>) -> Option<Arc<JobWorker>> {
        self.workers().insert(job_id, worker)
    }

    /// Returns the live worker for `job_id`, if any.
    ///
    /// A returned worker may already be stopping; pushes to it then fail
    /// with [`PushError::Closed`](super::PushError::Closed).
    pub fn lookup_worker(&self, job_id: JobId) -> Option<Arc<JobWorker>> {
        self.workers().get(&job_id).cloned()
    }

    /// Removes the worker for `job_id` and signals it to stop with `reason`.
    pub fn remove_worker(&self, job_id: JobId, reason: &str) -> Option<Arc<JobWorker>> {
        let removed = self.workers().remove(&job_id);
        if let Some(worker) = &removed {
            worker.stop(reason);
            info!(job_id = %job_id, reason, "removed job worker");
        }
        removed
    }

    /// Removes `worker` only if it is still the registered worker for
    /// `job_id` and has nothing running or queued. Its queue is closed in
    /// the same critical section, so no trigger can slip in afterwards.
    pub fn remove_if_idle(&self, job_id: JobId, worker: &Arc<JobWorker>) -> bool {
        let mut workers = self.workers();
        let is_current = workers.get(&job_id).is_some_and(|w| Arc::ptr_eq(w, worker));
        if !is_current || !worker.close_if_idle() {
            return false;
        }
        workers.remove(&job_id);
        true
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.workers().len()
    }

    /// Removes every worker, stops each with `reason` and waits for them to
    /// drain (bounded per worker by `join_timeout`).
    pub async fn shutdown_workers(&self, reason: &str, join_timeout: Duration) {
        let workers: Vec<_> = self.workers().drain().map(|(_, w)| w).collect();
        for worker in &workers {
            worker.stop(reason);
        }
        for worker in workers {
            if !worker.join(join_timeout).await {
                warn!(job_id = %worker.job_id(), "job worker aborted during shutdown");
            }
        }
    }
}
