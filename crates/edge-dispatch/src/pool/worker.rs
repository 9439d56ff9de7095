use crate::{
    pool::registry::{IdleWorker, WorkerRegistry},
    service::handler::Handler,
};
use core::{any::Any, panic::AssertUnwindSafe};
use edge_dispatch_core::{Error, ErrorTranslator, Job, Response, Result};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A pool member that executes one job at a time.
///
/// Each worker owns a [`Handler`] bound to its dedicated backend connection.
/// Once started, it repeats a fixed cycle until stopped:
///
/// 1. Advertise itself in the [`WorkerRegistry`] with a fresh inbox.
/// 2. Wait for either a job on that inbox or a stop request.
/// 3. Execute the job and deliver exactly one response for it. Handler
///    failures, panics included, are translated into a response and never
///    end the loop.
///
/// On a stop request the worker closes its inbox, executes a job that was
/// delivered in the same instant (so it is never lost), signals completion
/// and exits.
pub struct Worker<H> {
    id: usize,
    handler: H,
    registry: WorkerRegistry,
    translator: ErrorTranslator,
}

/// Control handle for a started [`Worker`].
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    quit: CancellationToken,
    done: oneshot::Receiver<()>,
}

impl WorkerHandle {
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Requests termination without waiting for it.
    ///
    /// A job already executing runs to completion first.
    pub fn stop(&self) {
        self.quit.cancel();
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Waits for the worker to exit.
    ///
    /// The completion signal is buffered, so this resolves even if the worker
    /// exited long before it was called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the worker task ended without
    /// signalling, e.g. because the runtime shut down underneath it.
    pub async fn done(self) -> Result<()> {
        self.done.await.map_err(|_| Error::ChannelError {
            context: format!("Worker {} exited without signalling completion", self.id),
        })
    }
}

impl<H: Handler> Worker<H> {
    #[must_use]
    pub const fn new(
        id: usize,
        handler: H,
        registry: WorkerRegistry,
        translator: ErrorTranslator,
    ) -> Self {
        Self {
            id,
            handler,
            registry,
            translator,
        }
    }

    /// Spawns the worker loop on the current Tokio runtime.
    #[must_use]
    pub fn start(self) -> WorkerHandle {
        let quit = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let handle = WorkerHandle {
            id: self.id,
            quit: quit.clone(),
            done: done_rx,
        };
        tokio::spawn(self.run(quit, done_tx));
        handle
    }

    async fn run(self, quit: CancellationToken, done: oneshot::Sender<()>) {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} started", self.id);

        loop {
            let (idle, mut inbox) = IdleWorker::new(self.id);

            tokio::select! {
                biased;
                () = quit.cancelled() => break,
                advertised = self.registry.advertise(idle) => {
                    if advertised.is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Worker {} found the registry closed", self.id);
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                () = quit.cancelled() => {
                    // Close first so a router still holding our advertisement
                    // gets its job back, then pick up anything that landed
                    // before the close.
                    inbox.close();
                    if let Ok(job) = inbox.try_recv() {
                        self.execute(job).await;
                    }
                    break;
                }
                received = &mut inbox => match received {
                    Ok(job) => self.execute(job).await,
                    // The advertisement was dropped unused; advertise again.
                    Err(_) => continue,
                },
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker {} received shutdown signal", self.id);

        if done.send(()).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Worker {} completion not observed", self.id);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} stopped", self.id);
    }

    /// Runs one job and delivers its response.
    ///
    /// Jobs whose context is already cancelled or expired, and malformed
    /// jobs, are answered without calling the handler. Jobs whose producer
    /// stopped waiting are skipped entirely.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            skip_all,
            fields(
                worker = self.id,
                job_id = %job.id(),
                operation = %job.operation(),
                resource = %job.resource(),
            )
        )
    )]
    async fn execute(&self, job: Job) {
        if job.is_abandoned() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Producer stopped waiting, skipping job");
            return;
        }

        let outcome = match job.context().check().and_then(|()| job.validate()) {
            Ok(()) => self.call_handler(&job).await,
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(mut response) => {
                response.id = job.id();
                response
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Job failed: {e}");
                self.translator.translate(&job, &e)
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Job finished with status {}", response.status);

        if let Err(_e) = job.respond(response) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping response: {_e}");
        }
    }

    /// Calls the handler, converting a panic into [`Error::HandlerPanic`].
    async fn call_handler(&self, job: &Job) -> Result<Response> {
        AssertUnwindSafe(self.handler.handle(job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::HandlerPanic {
                    context: panic_message(panic.as_ref()),
                })
            })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}
