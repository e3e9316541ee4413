//! Reliable delivery of execution results to the scheduling center.
//!
//! # Module Structure
//!
//! - [`client`]: the scheduling-center endpoint abstraction and its HTTP client
//! - [`delivery`]: ordered first-success delivery across endpoints
//! - [`spool`]: crash-safe files for batches no endpoint accepted
//! - [`sender`]: the sender and retry tasks

pub mod client;
pub mod delivery;
pub mod sender;
pub mod spool;

pub use client::{ClientError, HttpSchedulerClient, SchedulerClient};
pub use delivery::{CallbackDelivery, DeliveryOutcome, RetryStats};
pub use sender::{CallbackSender, CallbackService, DEFAULT_RETRY_INTERVAL};
pub use spool::{CallbackSpool, SpoolError};
