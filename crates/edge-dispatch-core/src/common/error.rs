//! Error types for the job dispatch subsystem.
//!
//! This module defines the central `Error` enum, which captures every failure a
//! job can meet between admission and response delivery. Each variant is
//! classified into a gRPC [`Code`] via [`Error::code`], which is the category
//! the error taxonomy in [`translate`](crate::translate) keys on.
//!
//! ## Error Cases
//! - `Backend`: The inventory rejected or failed the operation.
//! - `Connection`: Backend connections could not be established at startup.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `InvalidJob`: The job was malformed and never reached the handler.
//! - `HandlerPanic`: The handler panicked while executing the job.
//! - `QueueFull`: The job queue had no free capacity for a non-blocking submit.
//! - `Cancelled`: The caller cancelled the job's context.
//! - `DeadlineExceeded`: The job's deadline passed before it could run.
//! - `ServiceShutdown`: The job arrived while the dispatcher was stopping.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the job dispatch subsystem.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backend reported a failure for this operation.
    #[error("Backend error: {0}")]
    Backend(#[from] Status),

    /// Backend connection setup failed.
    #[error("Connection error: {context}")]
    Connection { context: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The job was malformed.
    #[error("Invalid job: {reason}")]
    InvalidJob { reason: String },

    /// The handler panicked. The worker survives and answers the job.
    #[error("Handler panicked: {context}")]
    HandlerPanic { context: String },

    /// The job queue is at capacity.
    #[error("Job queue is full")]
    QueueFull,

    /// The caller cancelled the job.
    #[error("Job cancelled by caller")]
    Cancelled,

    /// The job's deadline elapsed.
    #[error("Job deadline exceeded")]
    DeadlineExceeded,

    /// The dispatcher is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Classifies this error into a backend category.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Backend(status) => status.code(),
            Self::Connection { .. } | Self::ServiceShutdown => Code::Unavailable,
            Self::ChannelError { .. } | Self::HandlerPanic { .. } => Code::Internal,
            Self::InvalidJob { .. } => Code::InvalidArgument,
            Self::QueueFull => Code::ResourceExhausted,
            Self::Cancelled => Code::Cancelled,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
        }
    }

    /// Returns the raw backend message, if this error came from the backend.
    ///
    /// Used only for pattern classification; never copied into a response.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Backend(status) => Some(status.message()),
            _ => None,
        }
    }
}
