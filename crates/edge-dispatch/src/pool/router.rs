//! Per-job routing.
//!
//! Finding an idle worker can take arbitrarily long when every worker is busy,
//! so the dispatcher hands each dequeued job to its own short-lived task
//! running [`Router::route`] instead of blocking its loop.

use crate::pool::registry::WorkerRegistry;
use edge_dispatch_core::{Error, ErrorTranslator, Job};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Re-queue count from which every further re-queue is logged as a warning.
///
/// Re-queueing is unbounded; a job that keeps bouncing means workers are
/// departing faster than they are replaced.
const REQUEUE_WARN_THRESHOLD: u32 = 8;

/// Everything a routing task needs, cheap to clone per job.
#[derive(Debug, Clone)]
pub struct Router {
    registry: WorkerRegistry,
    queue: mpsc::Sender<Job>,
    quit: CancellationToken,
    translator: ErrorTranslator,
}

impl Router {
    #[must_use]
    pub const fn new(
        registry: WorkerRegistry,
        queue: mpsc::Sender<Job>,
        quit: CancellationToken,
        translator: ErrorTranslator,
    ) -> Self {
        Self {
            registry,
            queue,
            quit,
            translator,
        }
    }

    /// Delivers `job` to an idle worker.
    ///
    /// - If the selected worker departed after advertising, the job is pushed
    ///   back onto the job queue to be routed again.
    /// - If the dispatcher is stopping, the job is answered with
    ///   `503 Service Unavailable`.
    pub async fn route(&self, job: Job) {
        let idle = tokio::select! {
            biased;
            () = self.quit.cancelled() => return self.reject(job, &Error::ServiceShutdown),
            idle = self.registry.acquire() => idle,
        };

        let idle = match idle {
            Ok(idle) => idle,
            Err(e) => return self.reject(job, &e),
        };

        let _worker_id = idle.worker_id();
        match idle.assign(job) {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Routed job to worker {_worker_id}");
            }
            Err(job) => self.requeue(job, _worker_id).await,
        }
    }

    async fn requeue(&self, mut job: Job, _worker_id: usize) {
        let requeues = job.mark_requeued();
        if requeues >= REQUEUE_WARN_THRESHOLD {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Job {} re-queued {requeues} times; workers keep departing",
                job.id()
            );
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Worker {_worker_id} departed before taking job {}, re-queueing",
                job.id()
            );
        }

        let permit = tokio::select! {
            biased;
            () = self.quit.cancelled() => return self.reject(job, &Error::ServiceShutdown),
            permit = self.queue.reserve() => permit,
        };

        match permit {
            Ok(permit) => permit.send(job),
            Err(_) => self.reject(job, &Error::ServiceShutdown),
        }
    }

    fn reject(&self, job: Job, err: &Error) {
        let response = self.translator.translate(&job, err);
        if let Err(_e) = job.respond(response) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping rejection: {_e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{registry::IdleWorker, worker::Worker};
    use crate::service::handler::Handler;
    use edge_dispatch_core::{JobContext, Operation, Payload, Resource, Response, Result};
    use http::StatusCode;

    struct Accept;

    impl Handler for Accept {
        async fn handle(&self, job: &Job) -> Result<Response> {
            Ok(Response::empty(job.id(), StatusCode::NO_CONTENT))
        }
    }

    fn delete_site() -> (Job, edge_dispatch_core::ResponseReceiver) {
        Job::new(
            Operation::Delete,
            Resource::SITE,
            Payload::default().with_param("resourceId", "site-0001"),
            JobContext::new(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn departed_worker_job_is_requeued_then_completes_on_replacement() {
        let registry = WorkerRegistry::new(1);
        let (queue_tx, mut queue_rx) = mpsc::channel(4);
        let quit = CancellationToken::new();
        let router = Router::new(registry.clone(), queue_tx, quit, ErrorTranslator::DEFAULT);

        // The sole worker advertises, then stops before it is selected.
        let worker = Worker::new(0, Accept, registry.clone(), ErrorTranslator::DEFAULT).start();
        while registry.idle() == 0 {
            tokio::task::yield_now().await;
        }
        worker.stop();
        worker.done().await.unwrap();

        let (job, rx) = delete_site();
        let id = job.id();
        router.route(job).await;

        let requeued = queue_rx.recv().await.unwrap();
        assert_eq!(requeued.id(), id);
        assert_eq!(requeued.requeues(), 1);

        // A replacement worker picks the job up on the next routing attempt.
        let replacement = Worker::new(1, Accept, registry.clone(), ErrorTranslator::DEFAULT).start();
        router.route(requeued).await;
        let response = rx.await.unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        replacement.stop();
        replacement.done().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_answers_waiting_jobs() {
        let registry = WorkerRegistry::new(1);
        let (queue_tx, _queue_rx) = mpsc::channel(1);
        let quit = CancellationToken::new();
        let router = Router::new(
            registry,
            queue_tx,
            quit.clone(),
            ErrorTranslator::DEFAULT,
        );

        let (job, rx) = delete_site();
        let task = tokio::spawn(async move { router.route(job).await });
        tokio::task::yield_now().await;
        quit.cancel();
        task.await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.message(), Some("Service is shutting down."));
    }

    #[tokio::test]
    async fn requeue_onto_closed_queue_answers_the_job() {
        let registry = WorkerRegistry::new(1);
        let (queue_tx, queue_rx) = mpsc::channel(1);
        drop(queue_rx);
        let router = Router::new(
            registry.clone(),
            queue_tx,
            CancellationToken::new(),
            ErrorTranslator::DEFAULT,
        );

        let (idle, inbox) = IdleWorker::new(0);
        drop(inbox);
        registry.advertise(idle).await.unwrap();

        let (job, rx) = delete_site();
        router.route(job).await;
        assert_eq!(rx.await.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
