//! Ordered multi-endpoint delivery of callback batches.
//!
//! Endpoints are tried in configuration order and delivery stops at the
//! first one that accepts the batch. A batch no endpoint accepts is written
//! to the [`CallbackSpool`] for the retryer to pick up later.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::joblog::JobLogStore;
use crate::types::CallbackRecord;

use super::client::SchedulerClient;
use super::spool::{CallbackSpool, SpoolError};

/// What happened to a batch handed to [`CallbackDelivery::deliver_or_spool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// An endpoint accepted the batch.
    Delivered,
    /// No endpoint accepted it; it now lives in this spool file.
    Spooled(PathBuf),
    /// No endpoint accepted it and it could not be spooled either.
    Lost,
}

/// Counters from one pass over the spool directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    pub delivered: usize,
    pub respooled: usize,
    pub discarded: usize,
    /// Batches removed from the spool that could not be written back.
    pub lost: usize,
}

pub struct CallbackDelivery {
    clients: Vec<Arc<dyn SchedulerClient>>,
    spool: CallbackSpool,
    log_store: JobLogStore,
}

impl CallbackDelivery {
    pub fn new(clients: Vec<Arc<dyn SchedulerClient>>, spool: CallbackSpool, log_store: JobLogStore) -> Self {
        CallbackDelivery { clients, spool, log_store }
    }

    pub fn spool(&self) -> &CallbackSpool {
        &self.spool
    }

    /// Tries each endpoint in order. Returns true on the first success.
    pub async fn try_deliver(&self, batch: &[CallbackRecord]) -> bool {
        for client in &self.clients {
            match client.callback(batch).await {
                Ok(()) => {
                    self.annotate(batch, "----------- job callback finish.");
                    return true;
                }
                Err(e) => {
                    warn!(address = client.address(), records = batch.len(), error = %e, "callback delivery failed");
                    self.annotate(batch, &format!("----------- job callback fail, error: {e}"));
                }
            }
        }
        false
    }

    /// Delivers `batch`, spooling it to disk if every endpoint fails.
    pub async fn deliver_or_spool(&self, batch: &[CallbackRecord]) -> DeliveryOutcome {
        if batch.is_empty() || self.try_deliver(batch).await {
            return DeliveryOutcome::Delivered;
        }

        match self.spool.persist(batch) {
            Ok(path) => {
                debug!(path = %path.display(), records = batch.len(), "spooled callback batch");
                DeliveryOutcome::Spooled(path)
            }
            Err(e) => {
                let log_ids: Vec<_> = batch.iter().map(|r| r.log_id.0).collect();
                error!(error = %e, ?log_ids, "failed to spool undelivered callback batch");
                DeliveryOutcome::Lost
            }
        }
    }

    /// One retry pass over the spool directory.
    ///
    /// Each file is deleted before its batch is re-delivered; a batch that
    /// still cannot be delivered is spooled again under a fresh name. Empty
    /// and unparseable files are discarded.
    pub async fn retry_spooled(&self) -> RetryStats {
        let mut stats = RetryStats::default();
        if self.clients.is_empty() {
            return stats;
        }

        let files = match self.spool.pending() {
            Ok(f) => f,
            Err(e) => {
                warn!(dir = %self.spool.dir().display(), error = %e, "cannot list callback spool");
                return stats;
            }
        };

        for path in files {
            let batch = match self.spool.load(&path) {
                Ok(Some(batch)) => batch,
                Ok(None) | Err(SpoolError::Json(_)) => {
                    warn!(path = %path.display(), "discarding empty or corrupt callback spool file");
                    self.discard(&path);
                    stats.discarded += 1;
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read callback spool file");
                    continue;
                }
            };

            if let Err(e) = self.spool.remove(&path) {
                warn!(path = %path.display(), error = %e, "cannot remove callback spool file, retrying later");
                continue;
            }

            match self.deliver_or_spool(&batch).await {
                DeliveryOutcome::Delivered => stats.delivered += 1,
                DeliveryOutcome::Spooled(_) => stats.respooled += 1,
                DeliveryOutcome::Lost => {
                    let log_ids: Vec<_> = batch.iter().map(|r| r.log_id.0).collect();
                    error!(path = %path.display(), ?log_ids, "callback batch dropped during retry");
                    stats.lost += 1;
                }
            }
        }
        stats
    }

    fn discard(&self, path: &std::path::Path) {
        if let Err(e) = self.spool.remove(path) {
            warn!(path = %path.display(), error = %e, "failed to remove callback spool file");
        }
    }

    fn annotate(&self, batch: &[CallbackRecord], line: &str) {
        for record in batch {
            let path = self.log_store.file_name_for(record.log_timestamp, record.log_id);
            self.log_store.append(&path, line);
        }
    }
}
