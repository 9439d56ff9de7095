#![doc = include_str!("../README.md")]

pub mod config;
pub mod lifecycle;
pub mod pool;
pub mod service;
pub mod telemetry;

pub use config::{DispatcherArgs, DispatcherConfig, LogFormat};
pub use pool::dispatcher::{Dispatcher, DispatcherHandle, JobQueue};
pub use service::{
    grpc::GrpcConnector,
    handler::{Connector, Handler},
};
// Public re-export so downstream crates can build jobs without depending on
// `edge_dispatch_core` directly.
pub use edge_dispatch_core;
