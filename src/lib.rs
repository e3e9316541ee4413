//! Job Executor - the executor side of a distributed job scheduler.
//!
//! The scheduling center pushes triggers to this process; each job gets a
//! dedicated worker that runs its triggers serially, and every outcome is
//! reported back through a retrying callback channel.

pub mod callback;
pub mod config;
pub mod handler;
pub mod joblog;
pub mod runtime;
pub mod server;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
