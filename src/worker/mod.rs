//! Per-job workers and the dispatch layer in front of them.
//!
//! Each active job gets a dedicated worker that executes its triggers
//! serially, so a slow job never delays another job's triggers.
//!
//! # Module Structure
//!
//! - [`queue`]: FIFO trigger queue with log-id dedup
//! - [`config`]: poll interval and idle limit
//! - [`worker`]: the per-job execution loop
//! - [`registry`]: handler and worker lookup tables
//! - [`dispatch`]: reuse / replace / reject decisions per trigger

mod config;
pub mod dispatch;
mod queue;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::WorkerConfig;
pub use dispatch::{DispatchError, Dispatcher};
pub use queue::TriggerQueue;
pub use registry::Registry;
pub use worker::{JobWorker, PushError, WorkerDeps};
