//! HTTP transport for the executor.
//!
//! A thin binding of the dispatcher and the job log store to the routes the
//! scheduling center calls. No business logic lives here.
//!
//! # Endpoints
//!
//! - `POST /beat` - liveness as seen by the scheduling center
//! - `POST /idleBeat` - whether a job's worker is idle
//! - `POST /run` - submit a trigger
//! - `POST /kill` - stop a job's worker
//! - `POST /log` - read a trigger's log from a given line
//! - `GET /health` - returns 200 if the server is running

use std::sync::Arc;

pub mod executor;
pub mod health;

pub use executor::{beat_handler, idle_beat_handler, kill_handler, log_handler, run_handler};
pub use health::health_handler;

use crate::joblog::JobLogStore;
use crate::worker::Dispatcher;

/// Shared application state, handed to every handler through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    dispatcher: Arc<Dispatcher>,
    log_store: JobLogStore,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `dispatcher` - Receives `run`, `kill` and `idleBeat` requests
    /// * `log_store` - Serves `log` requests
    pub fn new(dispatcher: Arc<Dispatcher>, log_store: JobLogStore) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { dispatcher, log_store }),
        }
    }

    /// Returns the trigger dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Returns the job log store.
    pub fn log_store(&self) -> &JobLogStore {
        &self.inner.log_store
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/beat", post(beat_handler))
        .route("/idleBeat", post(idle_beat_handler))
        .route("/run", post(run_handler))
        .route("/kill", post(kill_handler))
        .route("/log", post(log_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
