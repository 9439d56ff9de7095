//! Shared job, response and error types.

pub mod error;
pub mod job;
pub mod translate;
pub mod types;

pub use error::{Error, Result};
pub use job::{Job, JobContext, Payload, Problem, Response, ResponsePayload, ResponseReceiver};
pub use translate::{ErrorTranslator, http_status};
pub use types::{JobId, Operation, Resource};
