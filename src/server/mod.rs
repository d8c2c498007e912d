//! Accept loop for the shared port.
//!
//! # Responsibilities
//! - Accept from the downgrading listener until shutdown
//! - Enforce `max_connections` via semaphore permits
//! - Hand each connection to the line service on its own task
//! - Drain live connections on shutdown
//!
//! Accept failures other than closure end the loop and are returned to the
//! caller; indeterminate detection never does.

pub mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};

use crate::config::schema::{ListenerConfig, ServiceConfig};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{DowngradingListener, Listener, ListenerError};

/// Serves the line service on a [`DowngradingListener`].
pub struct Server {
    listener_config: ListenerConfig,
    service_config: Arc<ServiceConfig>,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
}

impl Server {
    pub fn new(listener_config: ListenerConfig, service_config: ServiceConfig) -> Self {
        let connection_limit = Arc::new(Semaphore::new(listener_config.max_connections));
        Self {
            listener_config,
            service_config: Arc::new(service_config),
            connection_limit,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Run until `shutdown` fires or the listener fails.
    pub async fn run<L>(
        &self,
        listener: Arc<DowngradingListener<L>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError>
    where
        L: Listener,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Server accepting connections");

        let result = loop {
            // Acquire permit first (backpressure)
            let permit = tokio::select! {
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
                _ = shutdown.recv() => break Ok(()),
            };

            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Closed) => break Ok(()),
                    Err(e) => break Err(e),
                },
                _ = shutdown.recv() => break Ok(()),
            };

            let guard = self.tracker.track();
            let service_config = Arc::clone(&self.service_config);
            let connection_shutdown = shutdown.resubscribe();

            tracing::debug!(
                connection_id = %guard.id(),
                peer_addr = %peer_addr,
                protocol = %stream.classification(),
                available_permits = self.connection_limit.available_permits(),
                "Connection accepted"
            );

            tokio::spawn(async move {
                let _permit = permit;
                let id = guard.id();
                if let Err(e) = service::serve(stream, &service_config, connection_shutdown).await {
                    tracing::debug!(connection_id = %id, peer_addr = %peer_addr, error = %e, "Connection ended with error");
                }
                drop(guard);
            });
        };

        listener.close();
        self.drain(addr).await;
        result
    }

    async fn drain(&self, addr: SocketAddr) {
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(address = %addr, active_connections = active, "Draining connections");
        }
        if !self.tracker.wait_for_drain(self.listener_config.drain_timeout()).await {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain timeout elapsed, abandoning connections"
            );
        }
        tracing::info!(address = %addr, "Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::test_support::{server_config, FailingListener};

    #[tokio::test]
    async fn accept_failure_stops_the_server_with_that_error() {
        let listener = Arc::new(DowngradingListener::new(
            FailingListener {
                kind: io::ErrorKind::Other,
                message: "too many open files",
            },
            server_config(),
        ));
        let shutdown = Shutdown::new();
        let server = Server::new(ListenerConfig::default(), ServiceConfig::default());

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server.run(Arc::clone(&listener), shutdown.subscribe()),
        )
        .await
        .expect("server kept running after a failed accept");

        match result {
            Err(ListenerError::Accept(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::Other);
                assert_eq!(e.to_string(), "too many open files");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(listener.is_closed());
    }
}
