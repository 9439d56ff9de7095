//! Job admission, routing loop and pool lifecycle.
//!
//! A [`Dispatcher`] owns the bounded job queue, the idle-worker registry and
//! a fixed set of workers. [`Dispatcher::run`] connects the backend, starts
//! the workers and the routing loop, and returns a [`DispatcherHandle`] used to
//! stop the pool and wait for it to wind down.

use crate::{
    config::DispatcherConfig,
    pool::{
        registry::WorkerRegistry,
        router::Router,
        worker::{Worker, WorkerHandle},
    },
    service::handler::Connector,
};
use core::{pin::pin, time::Duration};
use edge_dispatch_core::{Error, ErrorTranslator, Job, Result};
use futures::future::join_all;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Floor for the shutdown warning interval, so waiting never degrades into a
/// busy loop.
const MIN_WARN_INTERVAL: Duration = Duration::from_millis(10);

/// Producer handle onto the dispatcher's bounded job queue.
///
/// Every job handed to a `JobQueue` is answered exactly once, including jobs
/// that are refused at admission.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    translator: ErrorTranslator,
}

impl JobQueue {
    /// Enqueues `job`, waiting for space while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if the dispatcher has stopped. The
    /// job has then already been answered with `503 Service Unavailable`.
    pub async fn submit(&self, job: Job) -> Result<()> {
        match self.tx.send(job).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(job)) => Err(self.refuse(job, Error::ServiceShutdown)),
        }
    }

    /// Enqueues `job` without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueFull`] if the queue is at capacity; the job is
    ///   answered with `429 Too Many Requests`.
    /// - [`Error::ServiceShutdown`] if the dispatcher has stopped; the job is
    ///   answered with `503 Service Unavailable`.
    pub fn try_submit(&self, job: Job) -> Result<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(self.refuse(job, Error::QueueFull)),
            Err(TrySendError::Closed(job)) => Err(self.refuse(job, Error::ServiceShutdown)),
        }
    }

    /// Maximum number of queued jobs.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots left in the queue right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn refuse(&self, job: Job, err: Error) -> Error {
        let response = self.translator.translate(&job, &err);
        if let Err(_e) = job.respond(response) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping refusal: {_e}");
        }
        err
    }
}

/// A not-yet-running worker pool.
///
/// Producers may obtain a [`JobQueue`] and start submitting before
/// [`run`](Self::run) is called; jobs simply wait in the queue until workers
/// exist.
pub struct Dispatcher<C: Connector> {
    config: DispatcherConfig,
    connector: C,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: mpsc::Receiver<Job>,
    registry: WorkerRegistry,
    quit: CancellationToken,
    tracker: TaskTracker,
    ready: watch::Sender<bool>,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(mut config: DispatcherConfig, connector: C) -> Self {
        config.max_workers = config.max_workers.max(1);
        config.max_jobs = config.max_jobs.max(1);
        config.shutdown_warn_interval = config.shutdown_warn_interval.max(MIN_WARN_INTERVAL);

        let (queue_tx, queue_rx) = mpsc::channel(config.max_jobs);
        let registry = WorkerRegistry::new(config.max_workers);
        let (ready, _) = watch::channel(false);

        Self {
            config,
            connector,
            queue_tx,
            queue_rx,
            registry,
            quit: CancellationToken::new(),
            tracker: TaskTracker::new(),
            ready,
        }
    }

    /// Registers the routing loop and per-job tasks on `tracker`, so the
    /// owning process can await them alongside its own tasks.
    ///
    /// [`DispatcherHandle::stopped`] closes the tracker before waiting on it.
    #[must_use]
    pub fn with_task_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    #[must_use]
    pub fn job_queue(&self) -> JobQueue {
        JobQueue {
            tx: self.queue_tx.clone(),
            translator: self.config.translator,
        }
    }

    /// Token whose cancellation starts the shutdown sequence.
    #[must_use]
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Readiness signal: flips to `true` once all workers are started and the
    /// routing loop is running, and back to `false` when shutdown begins.
    #[must_use]
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Connects the backend, starts `max_workers` workers and the routing
    /// loop, then signals readiness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the backend connections cannot be
    /// established. No worker is started in that case and jobs already
    /// queued are answered with `503 Service Unavailable`.
    pub async fn run(self) -> Result<DispatcherHandle> {
        let Self {
            config,
            connector,
            queue_tx,
            mut queue_rx,
            registry,
            quit,
            tracker,
            ready,
        } = self;
        let translator = config.translator;
        let max_workers = config.max_workers;

        #[cfg(feature = "tracing")]
        tracing::info!("Connecting {max_workers} workers to the backend");

        let connections = match connector.connect(max_workers).await {
            Ok(connections) if connections.len() == max_workers => connections,
            Ok(connections) => {
                let err = Error::Connection {
                    context: format!(
                        "expected {max_workers} backend connections, got {}",
                        connections.len()
                    ),
                };
                if let Err(_e) = connector.close(connections).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to release backend connections: {_e}");
                }
                return Err(abort(err, &mut queue_rx, &translator).await);
            }
            Err(e) => return Err(abort(e, &mut queue_rx, &translator).await),
        };

        let workers = connections
            .iter()
            .cloned()
            .enumerate()
            .map(|(id, connection)| {
                let handler = connector.handler(id, connection);
                Worker::new(id, handler, registry.clone(), translator).start()
            })
            .collect();

        let router = Router::new(registry.clone(), queue_tx.clone(), quit.clone(), translator);
        let handle = DispatcherHandle {
            queue: JobQueue {
                tx: queue_tx,
                translator,
            },
            quit: quit.clone(),
            tracker: tracker.clone(),
            ready: ready.subscribe(),
        };

        let pool = Pool {
            connector,
            connections,
            workers,
            registry,
            warn_interval: config.shutdown_warn_interval,
        };
        ready.send_replace(true);
        let routing = RoutingLoop {
            queue: queue_rx,
            router,
            quit,
            tracker: tracker.clone(),
            ready,
            translator,
        };
        tracker.spawn(routing.run(pool));

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher ready with {max_workers} workers");

        Ok(handle)
    }
}

/// Handle to a running dispatcher. Cloning shares the same dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    queue: JobQueue,
    quit: CancellationToken,
    tracker: TaskTracker,
    ready: watch::Receiver<bool>,
}

impl DispatcherHandle {
    #[must_use]
    pub fn job_queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Requests shutdown without waiting for it.
    pub fn stop(&self) {
        self.quit.cancel();
    }

    /// Waits until the routing loop, every per-job task and the shutdown
    /// sequence have finished.
    ///
    /// Only resolves after [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Stops the dispatcher and waits for shutdown to complete.
    ///
    /// Returns only after every worker has reported done, however long its
    /// current job takes, and after the backend connections are released.
    pub async fn shutdown(&self) {
        self.stop();
        self.stopped().await;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.quit.is_cancelled()
    }
}

/// Workers and the backend connections they were bound to.
struct Pool<C: Connector> {
    connector: C,
    connections: Vec<C::Connection>,
    workers: Vec<WorkerHandle>,
    registry: WorkerRegistry,
    warn_interval: Duration,
}

impl<C: Connector> Pool<C> {
    async fn shutdown(self) {
        // === Phase 1: Stop every worker ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Stopping {} workers", self.workers.len());
        for worker in &self.workers {
            worker.stop();
        }

        // === Phase 2: Wait for every worker to finish its current job ===
        // No deadline: connections stay open until the last handler returns.
        let mut done = pin!(join_all(self.workers.into_iter().map(|worker| async move {
            let _id = worker.id();
            if let Err(_e) = worker.done().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker {_id} failed during shutdown: {_e}");
            }
        })));
        let mut _waited = Duration::ZERO;
        while timeout(self.warn_interval, &mut done).await.is_err() {
            _waited += self.warn_interval;
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Workers still busy after {_waited:?}, waiting for them to finish"
            );
        }

        // === Phase 3: Release routing tasks still waiting for a worker ===
        self.registry.close();

        // === Phase 4: Release backend connections ===
        if let Err(_e) = self.connector.close(self.connections).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to release backend connections: {_e}");
        }
    }
}

/// The dispatcher's single long-lived task.
struct RoutingLoop {
    queue: mpsc::Receiver<Job>,
    router: Router,
    quit: CancellationToken,
    tracker: TaskTracker,
    ready: watch::Sender<bool>,
    translator: ErrorTranslator,
}

impl RoutingLoop {
    async fn run<C: Connector>(mut self, pool: Pool<C>) {
        loop {
            tokio::select! {
                biased;
                () = self.quit.cancelled() => break,
                job = self.queue.recv() => match job {
                    Some(job) => {
                        let router = self.router.clone();
                        self.tracker.spawn(async move { router.route(job).await });
                    }
                    None => break,
                },
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher received shutdown signal");
        self.ready.send_replace(false);
        self.quit.cancel();

        pool.shutdown().await;

        // === Phase 5: Answer everything left in the queue ===
        let _drained = drain(&mut self.queue, &self.translator).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher stopped ({_drained} queued jobs refused)");
    }
}

/// Fails startup, answering any job queued before [`Dispatcher::run`].
async fn abort(err: Error, queue: &mut mpsc::Receiver<Job>, translator: &ErrorTranslator) -> Error {
    #[cfg(feature = "tracing")]
    tracing::error!("Dispatcher failed to start: {err}");
    drain(queue, translator).await;
    err
}

/// Closes the queue and answers every buffered job with `503`.
async fn drain(queue: &mut mpsc::Receiver<Job>, translator: &ErrorTranslator) -> usize {
    queue.close();
    let mut drained = 0;
    while let Some(job) = queue.recv().await {
        let response = translator.translate(&job, &Error::ServiceShutdown);
        if let Err(_e) = job.respond(response) {
            #[cfg(feature = "tracing")]
            tracing::trace!("Dropping refusal: {_e}");
        }
        drained += 1;
    }
    drained
}
