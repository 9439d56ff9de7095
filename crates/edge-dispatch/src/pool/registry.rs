//! Idle-worker registry.
//!
//! A bounded MPMC channel of [`IdleWorker`] advertisements. A worker publishes
//! an advertisement each time it becomes idle, and the router consumes one to
//! select a worker, so "advertised" and "idle" are the same state and no
//! busy flag or lock is needed.
//!
//! Each advertisement carries a fresh single-use inbox. When the worker that
//! published it has since departed, [`IdleWorker::assign`] hands the job back
//! instead of losing it.

use edge_dispatch_core::{Error, Job, Result};
use tokio::sync::oneshot;

/// Receiving side of a worker's single-use inbox.
pub type Inbox = oneshot::Receiver<Job>;

/// One idle worker, as seen by the router.
#[derive(Debug)]
pub struct IdleWorker {
    worker_id: usize,
    inbox: oneshot::Sender<Job>,
}

impl IdleWorker {
    /// Creates an advertisement for `worker_id` and the inbox it waits on.
    #[must_use]
    pub fn new(worker_id: usize) -> (Self, Inbox) {
        let (inbox, rx) = oneshot::channel();
        (Self { worker_id, inbox }, rx)
    }

    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Whether the advertising worker has already closed its inbox.
    #[must_use]
    pub fn is_departed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Hands `job` to this worker.
    ///
    /// # Errors
    ///
    /// Returns the job unchanged if the worker closed its inbox, i.e. it
    /// stopped between advertising and being selected.
    pub fn assign(self, job: Job) -> core::result::Result<(), Job> {
        self.inbox.send(job)
    }
}

/// Bounded registry of idle workers. Cloning shares the same registry.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    tx: async_channel::Sender<IdleWorker>,
    rx: async_channel::Receiver<IdleWorker>,
}

impl WorkerRegistry {
    /// Creates a registry holding at most `capacity` advertisements.
    ///
    /// Sized to the worker count, so advertising never waits in steady state.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Publishes an idle worker, waiting while the registry is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the registry is closed.
    pub async fn advertise(&self, idle: IdleWorker) -> Result<()> {
        self.tx
            .send(idle)
            .await
            .map_err(|_| Error::ServiceShutdown)
    }

    /// Takes one idle worker, waiting until one is advertised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the registry is closed and
    /// empty.
    pub async fn acquire(&self) -> Result<IdleWorker> {
        self.rx.recv().await.map_err(|_| Error::ServiceShutdown)
    }

    /// Number of workers currently advertised as idle.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(usize::MAX)
    }

    /// Closes the registry, waking every task blocked on it.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
