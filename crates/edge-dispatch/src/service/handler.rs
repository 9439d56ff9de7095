//! Capabilities the dispatcher consumes.
//!
//! The dispatcher never executes business logic itself. It is generic over a
//! [`Connector`], which establishes one dedicated backend connection per
//! worker and binds each connection to a [`Handler`] that performs jobs.

use core::future::Future;
use edge_dispatch_core::{Job, Response, Result};

/// Executes one job against the backend.
///
/// A handler is owned by exactly one worker and only ever runs one job at a
/// time. Errors are translated into a [`Response`] by the worker, so a
/// handler never needs to build failure responses itself.
///
/// The job's [`JobContext`](edge_dispatch_core::JobContext) carries the
/// caller's cancellation and deadline; honoring them is the handler's
/// responsibility once execution has started.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, job: &Job) -> impl Future<Output = Result<Response>> + Send;
}

/// Establishes, binds and releases the backend connections used by workers.
pub trait Connector: Send + Sync + 'static {
    /// A single backend connection. Cloned into the handler bound to it.
    type Connection: Clone + Send + Sync + 'static;

    type Handler: Handler;

    /// Opens `count` connections, one per worker.
    ///
    /// # Errors
    ///
    /// Any failure aborts dispatcher startup before a worker is created.
    fn connect(&self, count: usize) -> impl Future<Output = Result<Vec<Self::Connection>>> + Send;

    /// Binds a handler for `worker_id` to its dedicated connection.
    fn handler(&self, worker_id: usize, connection: Self::Connection) -> Self::Handler;

    /// Releases every connection once all workers have stopped.
    ///
    /// # Errors
    ///
    /// Failures are logged by the dispatcher and otherwise ignored.
    fn close(&self, connections: Vec<Self::Connection>) -> impl Future<Output = Result<()>> + Send;
}
