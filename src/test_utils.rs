//! Shared test handlers, fake endpoints and polling helpers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};

use crate::callback::{CallbackDelivery, CallbackSender, CallbackSpool, ClientError, SchedulerClient};
use crate::handler::{self, HandlerError, JobContext, JobHandler};
use crate::joblog::JobLogStore;
use crate::types::CallbackRecord;

/// Sets SUCCESS with a fixed message.
pub struct SuccessHandler {
    msg: String,
}

impl SuccessHandler {
    pub fn new(msg: impl Into<String>) -> Self {
        SuccessHandler { msg: msg.into() }
    }
}

#[async_trait]
impl JobHandler for SuccessHandler {
    async fn execute(&self, ctx: &JobContext) -> handler::Result<()> {
        ctx.handle_success(Some(self.msg.clone()));
        Ok(())
    }
}

/// Returns an error from `execute`.
pub struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn execute(&self, _ctx: &JobContext) -> handler::Result<()> {
        Err(HandlerError::msg("database unreachable"))
    }
}

/// Returns `Ok` without recording a result.
pub struct NoResultHandler;

#[async_trait]
impl JobHandler for NoResultHandler {
    async fn execute(&self, _ctx: &JobContext) -> handler::Result<()> {
        Ok(())
    }
}

pub struct PanicHandler;

#[async_trait]
impl JobHandler for PanicHandler {
    async fn execute(&self, _ctx: &JobContext) -> handler::Result<()> {
        panic!("handler blew up");
    }
}

/// Sleeps for a fixed duration, then succeeds.
pub struct SleepHandler {
    duration: Duration,
    finished: AtomicUsize,
}

impl SleepHandler {
    pub fn new(duration: Duration) -> Self {
        SleepHandler { duration, finished: AtomicUsize::new(0) }
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn execute(&self, ctx: &JobContext) -> handler::Result<()> {
        tokio::time::sleep(self.duration).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        ctx.handle_success(None);
        Ok(())
    }
}

/// Blocks each execution until the test releases it.
///
/// Also counts lifecycle calls.
pub struct GateHandler {
    gate: Semaphore,
    started: AtomicUsize,
    completed: AtomicUsize,
    inits: AtomicUsize,
    destroys: AtomicUsize,
}

impl GateHandler {
    pub fn new() -> Self {
        GateHandler {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            inits: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    /// Lets `n` blocked or future executions finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

impl Default for GateHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for GateHandler {
    async fn init(&self) -> handler::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, ctx: &JobContext) -> handler::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| HandlerError::msg("gate closed"))?;
        permit.forget();
        self.completed.fetch_add(1, Ordering::SeqCst);
        ctx.handle_success(Some(format!("log {}", ctx.log_id())));
        Ok(())
    }

    async fn destroy(&self) -> handler::Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fake scheduling-center endpoint that records what it accepted.
pub struct RecordingClient {
    name: String,
    accepting: AtomicBool,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<CallbackRecord>>,
}

impl RecordingClient {
    pub fn accepting(name: &str) -> Self {
        Self::with_state(name, true)
    }

    pub fn failing(name: &str) -> Self {
        Self::with_state(name, false)
    }

    fn with_state(name: &str, accepting: bool) -> Self {
        RecordingClient {
            name: name.to_string(),
            accepting: AtomicBool::new(accepting),
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<CallbackRecord> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerClient for RecordingClient {
    fn address(&self) -> &str {
        &self.name
    }

    async fn callback(&self, batch: &[CallbackRecord]) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ClientError::Status(503));
        }
        self.delivered.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// A callback sender whose records land in the returned receiver.
pub fn capture_sender(log_store: &JobLogStore) -> (CallbackSender, mpsc::UnboundedReceiver<CallbackRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let delivery = Arc::new(CallbackDelivery::new(
        Vec::new(),
        CallbackSpool::new(log_store.callback_log_dir()),
        log_store.clone(),
    ));
    (CallbackSender::from_parts(tx, delivery), rx)
}

/// Receives exactly `n` records, failing the test after a generous timeout.
pub async fn recv_records(rx: &mut mpsc::UnboundedReceiver<CallbackRecord>, n: usize) -> Vec<CallbackRecord> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let record = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for callback record")
            .expect("callback channel closed");
        out.push(record);
    }
    out
}

/// Polls `cond` until it holds, for up to five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
