//! gRPC backend connections.
//!
//! [`GrpcConnector`] opens one HTTP/2 [`Channel`] per worker to the inventory
//! service, so a slow stream on one worker's connection never queues behind
//! another's. The closure passed at construction turns each channel into the
//! domain [`Handler`] (typically a generated `tonic` client wrapper).

use crate::{
    config::DispatcherConfig,
    service::handler::{Connector, Handler},
};
use core::time::Duration;
use edge_dispatch_core::{Error, Result};
use futures::future::try_join_all;
use tonic::transport::{Channel, Endpoint};

/// [`Connector`] over `tonic` channels.
pub struct GrpcConnector<F> {
    endpoint: Endpoint,
    bind: F,
}

impl<F, H> GrpcConnector<F>
where
    F: Fn(usize, Channel) -> H + Send + Sync + 'static,
    H: Handler,
{
    /// Prepares connections to `addr`. Nothing is dialed until the
    /// dispatcher runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if `addr` is not a valid URI.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, bind: F) -> Result<Self> {
        let addr = addr.into();
        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| Error::Connection {
                context: format!("invalid inventory address {addr:?}: {e}"),
            })?
            .connect_timeout(connect_timeout);
        Ok(Self { endpoint, bind })
    }

    /// Prepares connections to the configured inventory address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address is not a valid URI.
    pub fn from_config(config: &DispatcherConfig, bind: F) -> Result<Self> {
        Self::new(config.inventory_addr.clone(), config.connect_timeout, bind)
    }
}

impl<F, H> Connector for GrpcConnector<F>
where
    F: Fn(usize, Channel) -> H + Send + Sync + 'static,
    H: Handler,
{
    type Connection = Channel;
    type Handler = H;

    async fn connect(&self, count: usize) -> Result<Vec<Channel>> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Opening {count} connections to {}", self.endpoint.uri());

        try_join_all((0..count).map(|_| self.endpoint.connect()))
            .await
            .map_err(|e| Error::Connection {
                context: format!("failed to connect to {}: {e}", self.endpoint.uri()),
            })
    }

    fn handler(&self, worker_id: usize, connection: Channel) -> H {
        (self.bind)(worker_id, connection)
    }

    async fn close(&self, connections: Vec<Channel>) -> Result<()> {
        // Channels close their transport once the last clone is dropped; the
        // clones held by handlers are gone by the time this runs.
        #[cfg(feature = "tracing")]
        tracing::debug!("Releasing {} connections", connections.len());
        drop(connections);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_dispatch_core::{Job, Response};
    use http::StatusCode;

    struct Unreachable;

    impl Handler for Unreachable {
        async fn handle(&self, job: &Job) -> Result<Response> {
            Ok(Response::empty(job.id(), StatusCode::NO_CONTENT))
        }
    }

    #[test]
    fn rejects_invalid_address() {
        let err = GrpcConnector::new("not a uri", Duration::from_secs(1), |_, _| Unreachable)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn connect_failure_is_a_connection_error() {
        let connector = GrpcConnector::new(
            "http://127.0.0.1:1",
            Duration::from_millis(500),
            |_, _| Unreachable,
        )
        .unwrap();
        let err = connector.connect(2).await.unwrap_err();
        match err {
            Error::Connection { context } => assert!(context.contains("127.0.0.1:1")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
