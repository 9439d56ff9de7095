//! # Error taxonomy
//!
//! Pure mapping from a failed [`Job`] to the [`Response`] its producer sees.
//!
//! Translation happens in three passes:
//!
//! 1. **Storage constraints** - a foreign-key violation on `Delete`, or a
//!    uniqueness violation on `Post`/`Put`/`Patch`, is reported as
//!    `412 Precondition Failed` with a message naming the resource. These are
//!    recognised from the backend's message text, because the inventory
//!    surfaces them under generic codes.
//! 2. **Resource-aware categories** - not-found and permission-denied name the
//!    resource and the attempted verb.
//! 3. **Everything else** - a fixed message per category.
//!
//! Backend message text is only ever *matched*, never *copied*: storage engine
//! internals must not reach a client.

use crate::common::{
    error::Error,
    job::{Job, Response},
    types::{Operation, Resource},
};
use http::StatusCode;
use tonic::Code;

/// `499 Client Closed Request`, the de-facto status for caller cancellation.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Maps a backend category to the HTTP status a client sees.
///
/// Total over [`Code`]; anything without a more specific meaning is a
/// `500 Internal Server Error`.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Foreign-key violation phrases as reported by PostgreSQL, MySQL and SQLite.
const FOREIGN_KEY_MARKERS: &[&str] = &[
    "violates foreign key constraint",
    "foreign key constraint fails",
    "foreign key constraint failed",
];

/// Uniqueness violation phrases as reported by PostgreSQL, MySQL and SQLite.
const UNIQUE_MARKERS: &[&str] = &[
    "violates unique constraint",
    "duplicate key value",
    "duplicate entry",
    "unique constraint failed",
];

/// Translates job failures into client-facing responses.
///
/// Holds the constraint marker tables so they are injected where they are
/// used instead of living in process-wide mutable state.
#[derive(Copy, Clone, Debug)]
pub struct ErrorTranslator {
    foreign_key_markers: &'static [&'static str],
    unique_markers: &'static [&'static str],
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ErrorTranslator {
    pub const DEFAULT: Self = Self {
        foreign_key_markers: FOREIGN_KEY_MARKERS,
        unique_markers: UNIQUE_MARKERS,
    };

    /// Builds a translator with custom marker tables. Markers are matched
    /// case-insensitively and must be given in lowercase.
    #[must_use]
    pub const fn with_markers(
        foreign_key_markers: &'static [&'static str],
        unique_markers: &'static [&'static str],
    ) -> Self {
        Self {
            foreign_key_markers,
            unique_markers,
        }
    }

    /// Produces the response for `job` failing with `err`.
    ///
    /// The response always carries the job's ID.
    #[must_use]
    pub fn translate(&self, job: &Job, err: &Error) -> Response {
        let (status, message) = self.classify(job.operation(), job.resource(), err);
        Response::problem(job.id(), status, message)
    }

    /// Returns the status and sanitized message for an operation on a
    /// resource failing with `err`.
    #[must_use]
    pub fn classify(
        &self,
        operation: Operation,
        resource: &Resource,
        err: &Error,
    ) -> (StatusCode, String) {
        if let Some(raw) = err.backend_message() {
            let raw = raw.to_ascii_lowercase();
            if operation == Operation::Delete && contains_any(&raw, self.foreign_key_markers) {
                return (
                    StatusCode::PRECONDITION_FAILED,
                    format!(
                        "{resource} is already in use in one or more resources and cannot be deleted."
                    ),
                );
            }
            if operation.sets_unique_fields() && contains_any(&raw, self.unique_markers) {
                return (
                    StatusCode::PRECONDITION_FAILED,
                    format!(
                        "One or more unique fields of {resource} cannot be set because they are already in use by other resources."
                    ),
                );
            }
        }

        let code = err.code();
        let verb = operation.verb();
        let message = match (code, err) {
            (Code::NotFound, _) => format!("{resource} not found."),
            (Code::PermissionDenied, _) => {
                format!("Permission denied: not allowed to {verb} {resource}.")
            }
            (Code::Unauthenticated, _) => "Authentication is required.".to_string(),
            (Code::AlreadyExists, _) => format!("{resource} already exists."),
            (Code::InvalidArgument, Error::InvalidJob { .. }) => {
                format!("Malformed request: cannot {verb} {resource}.")
            }
            (Code::InvalidArgument, _) => format!("Invalid request to {verb} {resource}."),
            (Code::OutOfRange, _) => format!("Request to {verb} {resource} is out of range."),
            (Code::FailedPrecondition, _) => {
                format!("Cannot {verb} {resource} in its current state.")
            }
            (Code::Aborted, _) => format!("Request to {verb} {resource} was aborted, retry."),
            (Code::ResourceExhausted, _) => "Too many requests, retry later.".to_string(),
            (Code::DeadlineExceeded, _) => format!("Request to {verb} {resource} timed out."),
            (Code::Cancelled, _) => "Request was cancelled.".to_string(),
            (Code::Unimplemented, _) => format!("Cannot {verb} {resource}: not implemented."),
            (Code::Unavailable, Error::ServiceShutdown) => "Service is shutting down.".to_string(),
            (Code::Unavailable, _) => "Service is temporarily unavailable.".to_string(),
            _ => format!("Failed to {verb} {resource}: internal server error."),
        };

        (http_status(code), message)
    }
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}
