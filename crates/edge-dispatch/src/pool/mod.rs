//! The worker pool.
//!
//! ## Structure
//!
//! - [`dispatcher`] - job queue, routing loop, startup and graceful shutdown.
//! - [`router`] - per-job task that selects an idle worker.
//! - [`registry`] - bounded channel of idle-worker advertisements.
//! - [`worker`] - long-lived executor bound to one backend connection.

pub mod dispatcher;
pub mod registry;
pub mod router;
pub mod worker;

#[cfg(test)]
mod tests;
