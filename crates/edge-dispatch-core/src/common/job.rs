//! # Jobs and responses
//!
//! A [`Job`] is one admitted unit of work. It is created together with a
//! single-use response channel: the producer keeps the [`ResponseReceiver`],
//! and whichever worker ends up executing the job answers through
//! [`Job::respond`], which consumes the job. Ownership therefore guarantees
//! that a job is answered at most once; the dispatch layer guarantees it is
//! answered at least once.
//!
//! The [`Payload`] is opaque to the dispatch layer. The [`JobContext`] carries
//! cancellation, an optional deadline and caller metadata through to the
//! handler.

use crate::common::{
    error::{Error, Result},
    types::{JobId, Operation, Resource},
};
use core::time::Duration;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::{sync::oneshot, time::Instant};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

/// Receiving half of a job's response channel.
///
/// Resolves to exactly one [`Response`]. A `RecvError` means the job was
/// dropped without an answer, which the dispatcher never does on purpose.
pub type ResponseReceiver = oneshot::Receiver<Response>;

/// Operation-specific request content. Never interpreted by the dispatcher.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    /// Request body, if any.
    pub data: Option<Value>,
    /// Query and path parameters.
    pub params: BTreeMap<String, String>,
}

impl Payload {
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Execution context threaded from the producer to the handler.
#[derive(Clone, Debug, Default)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    metadata: MetadataMap,
}

impl JobContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the context to an existing cancellation token, typically the
    /// one owned by the request that produced the job.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attaches caller identity/authorization metadata for the handler to
    /// forward to the backend.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Time left before the deadline, `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context was cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// One admitted unit of work.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    operation: Operation,
    resource: Resource,
    payload: Payload,
    context: JobContext,
    requeues: u32,
    response_tx: oneshot::Sender<Response>,
}

impl Job {
    /// Creates a job and the receiver its single [`Response`] arrives on.
    #[must_use]
    pub fn new(
        operation: Operation,
        resource: Resource,
        payload: Payload,
        context: JobContext,
    ) -> (Self, ResponseReceiver) {
        let (response_tx, response_rx) = oneshot::channel();
        let job = Self {
            id: JobId::new(),
            operation,
            resource,
            payload,
            context,
            requeues: 0,
            response_tx,
        };
        (job, response_rx)
    }

    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub const fn context(&self) -> &JobContext {
        &self.context
    }

    /// Number of times this job was pushed back onto the queue because the
    /// worker selected for it had already departed.
    #[must_use]
    pub const fn requeues(&self) -> u32 {
        self.requeues
    }

    /// Records one more re-queue and returns the new count.
    pub fn mark_requeued(&mut self) -> u32 {
        self.requeues = self.requeues.saturating_add(1);
        self.requeues
    }

    /// Whether the producer has stopped waiting for the response.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.response_tx.is_closed()
    }

    /// Rejects structurally malformed jobs before they reach a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJob`] when a body-carrying operation has no
    /// body.
    pub fn validate(&self) -> Result<()> {
        if self.operation.requires_body() && self.payload.data.is_none() {
            return Err(Error::InvalidJob {
                reason: format!(
                    "{} of {} requires a request body",
                    self.operation, self.resource
                ),
            });
        }
        Ok(())
    }

    /// Delivers the job's one and only response, closing the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the producer dropped its receiver.
    pub fn respond(self, response: Response) -> Result<()> {
        self.response_tx
            .send(response)
            .map_err(|_| Error::ChannelError {
                context: format!("Response receiver for job {} dropped", self.id),
            })
    }
}

/// Problem description carried by a failed [`Response`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub status: u16,
    pub message: String,
}

/// Body of a [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Data(Value),
    Problem(Problem),
    Empty,
}

/// Outcome of executing a [`Job`].
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: JobId,
    pub status: StatusCode,
    pub payload: ResponsePayload,
}

impl Response {
    #[must_use]
    pub const fn new(id: JobId, status: StatusCode, payload: ResponsePayload) -> Self {
        Self {
            id,
            status,
            payload,
        }
    }

    /// `200 OK` carrying `data`.
    #[must_use]
    pub const fn ok(id: JobId, data: Value) -> Self {
        Self::new(id, StatusCode::OK, ResponsePayload::Data(data))
    }

    /// A bodiless response, e.g. `204 No Content` after a delete.
    #[must_use]
    pub const fn empty(id: JobId, status: StatusCode) -> Self {
        Self::new(id, status, ResponsePayload::Empty)
    }

    /// A failed response with a user-facing message.
    pub fn problem(id: JobId, status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(
            id,
            status,
            ResponsePayload::Problem(Problem {
                status: status.as_u16(),
                message: message.into(),
            }),
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The problem message, when this response describes a failure.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            ResponsePayload::Problem(problem) => Some(&problem.message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot::error::TryRecvError;

    fn get_host() -> (Job, ResponseReceiver) {
        Job::new(
            Operation::Get,
            Resource::HOST,
            Payload::default().with_param("resourceId", "host-1234abcd"),
            JobContext::new(),
        )
    }

    #[tokio::test]
    async fn response_is_delivered_once_then_channel_is_closed() {
        let (job, mut rx) = get_host();
        let id = job.id();
        job.respond(Response::ok(id, json!({"name": "edge-01"})))
            .unwrap();

        let response = (&mut rx).await.unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn respond_fails_when_producer_is_gone() {
        let (job, rx) = get_host();
        drop(rx);
        assert!(job.is_abandoned());
        let id = job.id();
        assert!(matches!(
            job.respond(Response::empty(id, StatusCode::NO_CONTENT)),
            Err(Error::ChannelError { .. })
        ));
    }

    #[test]
    fn body_carrying_job_without_body_is_malformed() {
        let (job, _rx) = Job::new(
            Operation::Post,
            Resource::SITE,
            Payload::default(),
            JobContext::new(),
        );
        let err = job.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid job: Post of Site requires a request body"
        );

        let (job, _rx) = Job::new(
            Operation::Post,
            Resource::SITE,
            Payload::default().with_data(json!({"name": "store-42"})),
            JobContext::new(),
        );
        assert!(job.validate().is_ok());
    }

    #[test]
    fn context_reports_cancellation_before_deadline() {
        let ctx = JobContext::new().with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(60));

        ctx.cancellation().cancel();
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn context_reports_expired_deadline() {
        let ctx = JobContext::new().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn requeue_counter_increments() {
        let (mut job, _rx) = get_host();
        assert_eq!(job.requeues(), 0);
        assert_eq!(job.mark_requeued(), 1);
        assert_eq!(job.mark_requeued(), 2);
    }

    #[test]
    fn problem_payload_serializes_flat() {
        let id = JobId::new();
        let response = Response::problem(id, StatusCode::NOT_FOUND, "Host not found.");
        assert_eq!(response.message(), Some("Host not found."));
        assert_eq!(
            serde_json::to_value(&response.payload).unwrap(),
            json!({"status": 404, "message": "Host not found."})
        );
    }
}
