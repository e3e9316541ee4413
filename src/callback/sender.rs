//! Background tasks that move callback records to the scheduling center.
//!
//! The sender task takes one record, sweeps up everything else already
//! queued into the same batch and delivers it. The retry task re-delivers
//! spooled batches on a fixed interval. On shutdown the sender drains the
//! queue one last time before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::CallbackRecord;

use super::delivery::CallbackDelivery;

/// Default pause between retry passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest accepted pause between retry passes.
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Handle used by workers to hand off callback records.
///
/// Cheap to clone. Pushing never blocks.
#[derive(Clone)]
pub struct CallbackSender {
    tx: mpsc::UnboundedSender<CallbackRecord>,
    delivery: Arc<CallbackDelivery>,
}

impl CallbackSender {
    pub(crate) fn from_parts(tx: mpsc::UnboundedSender<CallbackRecord>, delivery: Arc<CallbackDelivery>) -> Self {
        CallbackSender { tx, delivery }
    }

    /// Queues a record for delivery.
    ///
    /// Once the sender task has shut down the record is spooled straight to
    /// disk so the retryer of the next run still reports it.
    pub fn push(&self, record: CallbackRecord) {
        debug!(log_id = %record.log_id, code = %record.handle_code, "push callback");
        if let Err(mpsc::error::SendError(record)) = self.tx.send(record) {
            warn!(log_id = %record.log_id, "callback sender stopped, spooling record");
            if let Err(e) = self.delivery.spool().persist(std::slice::from_ref(&record)) {
                error!(log_id = %record.log_id, error = %e, "failed to spool callback record");
            }
        }
    }
}

/// The running sender and retry tasks.
pub struct CallbackService {
    sender: CallbackSender,
    cancel: CancellationToken,
    sender_task: JoinHandle<()>,
    retry_task: JoinHandle<()>,
}

impl CallbackService {
    /// Spawns the sender and retry tasks.
    ///
    /// # Arguments
    ///
    /// * `delivery` - Endpoints and spool shared by both tasks
    /// * `retry_interval` - Pause between retry passes, raised to a small
    ///   minimum if shorter
    pub fn start(delivery: Arc<CallbackDelivery>, retry_interval: Duration) -> Self {
        let retry_interval = retry_interval.max(MIN_RETRY_INTERVAL);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let sender_task = tokio::spawn(run_sender(rx, Arc::clone(&delivery), cancel.clone()));
        let retry_task = tokio::spawn(run_retryer(Arc::clone(&delivery), retry_interval, cancel.clone()));

        CallbackService {
            sender: CallbackSender::from_parts(tx, delivery),
            cancel,
            sender_task,
            retry_task,
        }
    }

    pub fn sender(&self) -> CallbackSender {
        self.sender.clone()
    }

    /// Stops both tasks after a final flush of queued records.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.sender_task.await {
            error!(error = %e, "callback sender task failed");
        }
        if let Err(e) = self.retry_task.await {
            error!(error = %e, "callback retry task failed");
        }
    }
}

async fn run_sender(
    mut rx: mpsc::UnboundedReceiver<CallbackRecord>,
    delivery: Arc<CallbackDelivery>,
    cancel: CancellationToken,
) {
    info!("callback sender started");
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = rx.recv() => match record {
                Some(r) => r,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(record) = rx.try_recv() {
            batch.push(record);
        }
        delivery.deliver_or_spool(&batch).await;
    }

    rx.close();
    let mut remaining = Vec::new();
    while let Ok(record) = rx.try_recv() {
        remaining.push(record);
    }
    if !remaining.is_empty() {
        info!(records = remaining.len(), "flushing callbacks before shutdown");
        delivery.deliver_or_spool(&remaining).await;
    }
    info!("callback sender stopped");
}

async fn run_retryer(delivery: Arc<CallbackDelivery>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = delivery.retry_spooled().await;
                if stats.delivered + stats.respooled + stats.discarded + stats.lost > 0 {
                    info!(
                        delivered = stats.delivered,
                        respooled = stats.respooled,
                        discarded = stats.discarded,
                        lost = stats.lost,
                        "callback retry pass finished"
                    );
                }
            }
        }
    }
    info!("callback retryer stopped");
}
