//! Executor assembly and orderly shutdown.
//!
//! [`ExecutorRuntime::start`] builds every subsystem from an
//! [`ExecutorConfig`] and spawns the background tasks. [`ExecutorRuntime::shutdown`]
//! tears them down in dependency order: workers first, so their final FAIL
//! callbacks reach the sender; then the callback service, which flushes them;
//! then log retention.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::callback::{
    CallbackDelivery, CallbackService, CallbackSpool, ClientError, HttpSchedulerClient, SchedulerClient,
};
use crate::config::ExecutorConfig;
use crate::handler::{GlueCompiler, HandlerFactory, JobHandler};
use crate::joblog::{self, JobLogStore};
use crate::server::AppState;
use crate::worker::{Dispatcher, Registry, WorkerDeps};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to prepare log directory: {0}")]
    LogDir(#[from] io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A running executor: dispatcher, callback tasks and log retention.
pub struct ExecutorRuntime {
    dispatcher: Arc<Dispatcher>,
    log_store: JobLogStore,
    callbacks: CallbackService,
    retention_cancel: CancellationToken,
    retention_task: JoinHandle<()>,
}

impl ExecutorRuntime {
    /// Builds and starts the executor.
    ///
    /// `handlers` are registered as bean handlers under their names.
    /// `factory` compiles glue sources; without one, glue triggers are
    /// rejected.
    pub fn start(
        config: ExecutorConfig,
        handlers: Vec<(String, Arc<dyn JobHandler>)>,
        factory: Option<Arc<dyn HandlerFactory>>,
    ) -> Result<Self> {
        let log_store = JobLogStore::new(&config.log_path);
        log_store.ensure_dirs()?;

        let mut clients: Vec<Arc<dyn SchedulerClient>> = Vec::with_capacity(config.admin_addresses.len());
        for address in &config.admin_addresses {
            let client = HttpSchedulerClient::new(address, config.callback_timeout_secs)?;
            clients.push(Arc::new(client));
        }
        if clients.is_empty() {
            warn!("no scheduling center configured, callbacks will only be spooled");
        }

        let delivery = Arc::new(CallbackDelivery::new(
            clients,
            CallbackSpool::new(log_store.callback_log_dir()),
            log_store.clone(),
        ));
        let callbacks = CallbackService::start(delivery, config.callback_retry_interval);

        let registry = Arc::new(Registry::new());
        for (name, handler) in handlers {
            registry.register_handler(name, handler);
        }

        let deps = WorkerDeps {
            config: config.worker.clone(),
            log_store: log_store.clone(),
            callbacks: callbacks.sender(),
            registry,
        };
        let dispatcher = Arc::new(Dispatcher::new(GlueCompiler::new(factory), deps));

        let retention_cancel = CancellationToken::new();
        let retention_task = tokio::spawn(joblog::run_retention(
            log_store.clone(),
            config.log_retention_days,
            retention_cancel.clone(),
        ));

        info!(
            log_path = %config.log_path.display(),
            admin_addresses = config.admin_addresses.len(),
            "executor runtime started"
        );

        Ok(ExecutorRuntime {
            dispatcher,
            log_store,
            callbacks,
            retention_cancel,
            retention_task,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn log_store(&self) -> &JobLogStore {
        &self.log_store
    }

    /// State for [`crate::server::build_router`].
    pub fn app_state(&self) -> AppState {
        AppState::new(Arc::clone(&self.dispatcher), self.log_store.clone())
    }

    /// Stops workers, flushes callbacks, then stops log retention.
    pub async fn shutdown(self) {
        info!("executor runtime shutting down");
        self.dispatcher.shutdown().await;
        self.callbacks.shutdown().await;
        self.retention_cancel.cancel();
        if let Err(e) = self.retention_task.await {
            error!(error = %e, "log retention task failed");
        }
        info!("executor runtime stopped");
    }
}
