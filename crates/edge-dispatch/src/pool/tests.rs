use crate::{
    config::DispatcherConfig,
    pool::dispatcher::Dispatcher,
    service::handler::{Connector, Handler},
};
use core::time::Duration;
use edge_dispatch_core::{
    Error, Job, JobContext, Operation, Payload, Resource, Response, ResponseReceiver, Result,
};
use http::StatusCode;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::{Notify, Semaphore};

/// Hands every worker a clone of the same handler over a fake connection.
#[derive(Clone)]
struct MemoryConnector<H> {
    handler: H,
    bound: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl<H> MemoryConnector<H> {
    fn new(handler: H) -> Self {
        Self {
            handler,
            bound: Arc::default(),
            closed: Arc::default(),
        }
    }
}

impl<H: Handler + Clone> Connector for MemoryConnector<H> {
    type Connection = usize;
    type Handler = H;

    async fn connect(&self, count: usize) -> Result<Vec<usize>> {
        Ok((0..count).collect())
    }

    fn handler(&self, _worker_id: usize, _connection: usize) -> H {
        self.bound.fetch_add(1, Ordering::SeqCst);
        self.handler.clone()
    }

    async fn close(&self, _connections: Vec<usize>) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Refuses every connection attempt.
#[derive(Default)]
struct UnreachableBackend {
    bound: Arc<AtomicUsize>,
}

impl Connector for UnreachableBackend {
    type Connection = usize;
    type Handler = Sleepy;

    async fn connect(&self, _count: usize) -> Result<Vec<usize>> {
        Err(Error::Connection {
            context: "inventory unreachable".to_string(),
        })
    }

    fn handler(&self, _worker_id: usize, _connection: usize) -> Sleepy {
        self.bound.fetch_add(1, Ordering::SeqCst);
        Sleepy::default()
    }

    async fn close(&self, _connections: Vec<usize>) -> Result<()> {
        Ok(())
    }
}

/// Sleeps briefly, then succeeds. Tracks peak concurrency.
#[derive(Clone, Default)]
struct Sleepy {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Handler for Sleepy {
    async fn handle(&self, job: &Job) -> Result<Response> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Response::ok(job.id(), json!({ "resource": job.resource().as_str() })))
    }
}

/// Blocks inside the handler until the test opens the gate.
#[derive(Clone)]
struct Gated {
    entered: Arc<Notify>,
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl Gated {
    fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::default(),
        }
    }
}

impl Handler for Gated {
    async fn handle(&self, job: &Job) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::ChannelError {
                context: e.to_string(),
            })?;
        Ok(Response::empty(job.id(), StatusCode::OK))
    }
}

/// Panics on its first call, then succeeds.
#[derive(Clone, Default)]
struct PanicsOnce {
    panicked: Arc<AtomicBool>,
}

impl Handler for PanicsOnce {
    async fn handle(&self, job: &Job) -> Result<Response> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("inventory client poisoned");
        }
        Ok(Response::empty(job.id(), StatusCode::OK))
    }
}

/// Takes a while, recording when it has started and finished.
#[derive(Clone, Default)]
struct Slow {
    entered: Arc<Notify>,
    finished: Arc<AtomicBool>,
}

impl Handler for Slow {
    async fn handle(&self, job: &Job) -> Result<Response> {
        self.entered.notify_one();
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(Response::empty(job.id(), StatusCode::OK))
    }
}

fn list_hosts() -> (Job, ResponseReceiver) {
    Job::new(
        Operation::List,
        Resource::HOST,
        Payload::default(),
        JobContext::new(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_gets_its_own_response() {
    let connector = MemoryConnector::new(Sleepy::default());
    let dispatcher = Dispatcher::new(DispatcherConfig::new(2, 10), connector.clone());
    let handle = dispatcher.run().await.unwrap();
    let queue = handle.job_queue();

    let mut pending = Vec::new();
    for _ in 0..5 {
        let (job, rx) = list_hosts();
        pending.push((job.id(), rx));
        queue.submit(job).await.unwrap();
    }

    for (id, rx) in pending {
        let response = rx.await.unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.status, StatusCode::OK);
    }

    assert_eq!(connector.bound.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
    assert!(connector.closed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_worker_count() {
    let handler = Sleepy::default();
    let connector = MemoryConnector::new(handler.clone());
    let handle = Dispatcher::new(DispatcherConfig::new(3, 32), connector)
        .run()
        .await
        .unwrap();
    let queue = handle.job_queue();

    let mut receivers = Vec::new();
    for _ in 0..16 {
        let (job, rx) = list_hosts();
        queue.submit(job).await.unwrap();
        receivers.push(rx);
    }
    for rx in receivers {
        assert!(rx.await.unwrap().is_success());
    }

    let peak = handler.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency was {peak}");
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_wins_over_pending_jobs() {
    let handler = Gated::new();
    let connector = MemoryConnector::new(handler.clone());
    let handle = Dispatcher::new(DispatcherConfig::new(1, 10), connector)
        .run()
        .await
        .unwrap();
    let queue = handle.job_queue();

    let (a, rx_a) = list_hosts();
    queue.submit(a).await.unwrap();
    handler.entered.notified().await;

    let (b, rx_b) = list_hosts();
    let (c, rx_c) = list_hosts();
    queue.submit(b).await.unwrap();
    queue.submit(c).await.unwrap();

    handle.stop();
    handler.gate.add_permits(3);
    handle.stopped().await;

    assert_eq!(rx_a.await.unwrap().status, StatusCode::OK);
    for rx in [rx_b, rx_c] {
        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.message(), Some("Service is shutting down."));
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submit_after_shutdown_is_answered() {
    let handle = Dispatcher::new(
        DispatcherConfig::new(1, 1),
        MemoryConnector::new(Sleepy::default()),
    )
    .run()
    .await
    .unwrap();
    handle.shutdown().await;

    let queue = handle.job_queue();
    assert!(queue.is_closed());

    let (job, rx) = list_hosts();
    assert!(matches!(
        queue.submit(job).await,
        Err(Error::ServiceShutdown)
    ));
    assert_eq!(rx.await.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn failed_startup_starts_no_workers() {
    let connector = UnreachableBackend::default();
    let bound = connector.bound.clone();
    let dispatcher = Dispatcher::new(DispatcherConfig::new(4, 4), connector);
    let ready = dispatcher.ready();

    let (job, rx) = list_hosts();
    dispatcher.job_queue().submit(job).await.unwrap();

    let err = dispatcher.run().await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
    assert_eq!(bound.load(Ordering::SeqCst), 0);
    assert!(!*ready.borrow());
    assert_eq!(rx.await.unwrap().status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ready_tracks_lifecycle() {
    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(2, 2),
        MemoryConnector::new(Sleepy::default()),
    );
    let mut ready = dispatcher.ready();
    assert!(!*ready.borrow());

    let handle = dispatcher.run().await.unwrap();
    ready.wait_for(|ready| *ready).await.unwrap();
    assert!(handle.is_ready());

    handle.shutdown().await;
    assert!(handle.is_stopping());
    assert!(!handle.is_ready());
}

#[tokio::test]
async fn try_submit_refuses_when_full() {
    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(1, 1),
        MemoryConnector::new(Sleepy::default()),
    );
    let queue = dispatcher.job_queue();
    assert_eq!(queue.capacity(), 1);

    let (first, _first_rx) = list_hosts();
    queue.try_submit(first).unwrap();
    assert_eq!(queue.available(), 0);

    let (second, second_rx) = list_hosts();
    assert!(matches!(queue.try_submit(second), Err(Error::QueueFull)));
    let response = second_rx.await.unwrap();
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quit_token_triggers_shutdown() {
    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(2, 4),
        MemoryConnector::new(Sleepy::default()),
    );
    let quit = dispatcher.quit_token();
    let handle = dispatcher.run().await.unwrap();

    quit.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle.stopped())
        .await
        .unwrap();
    assert!(handle.job_queue().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_is_answered_and_worker_survives() {
    let handle = Dispatcher::new(
        DispatcherConfig::new(1, 4),
        MemoryConnector::new(PanicsOnce::default()),
    )
    .run()
    .await
    .unwrap();
    let queue = handle.job_queue();

    let (first, first_rx) = list_hosts();
    queue.submit(first).await.unwrap();
    let response = first_rx.await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.message(),
        Some("Failed to list Host: internal server error.")
    );

    let (second, second_rx) = list_hosts();
    queue.submit(second).await.unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), second_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_running_jobs() {
    let handler = Slow::default();
    let connector = MemoryConnector::new(handler.clone());
    let config =
        DispatcherConfig::new(1, 4).with_shutdown_warn_interval(Duration::from_millis(50));
    let handle = Dispatcher::new(config, connector.clone())
        .run()
        .await
        .unwrap();

    let (job, mut rx) = list_hosts();
    handle.job_queue().submit(job).await.unwrap();
    handler.entered.notified().await;

    handle.shutdown().await;

    assert!(handler.finished.load(Ordering::SeqCst));
    assert!(connector.closed.load(Ordering::SeqCst));
    assert_eq!(rx.try_recv().unwrap().status, StatusCode::OK);
}
