//! Backend-facing capabilities.
//!
//! - [`handler`] - the [`Handler`](handler::Handler) and
//!   [`Connector`](handler::Connector) traits the pool is generic over.
//! - [`grpc`] - a [`Connector`](handler::Connector) over `tonic` channels.

pub mod grpc;
pub mod handler;
