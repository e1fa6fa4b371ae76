//! Local SOCKS5 listener.
//!
//! Accepts local application connections, runs the SOCKS5 handshake for
//! each in its own task, and hands established pairs to a relay task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::config::ClientConfig;
use crate::crypto::SharedSecret;
use crate::error::{Error, Result};
use crate::proxy::metrics::ProxyMetrics;
use crate::proxy::relay::Relay;
use crate::proxy::socks5::Negotiator;
use crate::shutdown::Shutdown;

/// Bound local endpoint, ready to serve.
pub struct Listener {
    listener: TcpListener,
    negotiator: Negotiator,
    metrics: Arc<ProxyMetrics>,
    shutdown: Shutdown,
}

impl Listener {
    /// Validate `config`, derive the shared secret, and bind the local socket.
    pub async fn bind(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let secret = Arc::new(SharedSecret::from_password(&config.password)?);
        Self::bind_with_secret(config, secret).await
    }

    /// Bind using already derived key material.
    pub async fn bind_with_secret(config: &ClientConfig, secret: Arc<SharedSecret>) -> Result<Self> {
        let addr = config.local_endpoint();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;

        tracing::info!("SOCKS5 proxy listening on {}", addr);
        tracing::info!("Tunnelling to relay server {}", config.server_endpoint());

        Ok(Self {
            listener,
            negotiator: Negotiator::from_config(config, secret),
            metrics: Arc::new(ProxyMetrics::new()),
            shutdown: Shutdown::new(),
        })
    }

    /// Use an externally owned shutdown signal.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shutdown signal observed by this listener and its relays.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Shared metrics for this listener.
    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until shutdown is triggered.
    ///
    /// Per-connection failures are logged and never end the loop.
    pub async fn run(self) -> Result<()> {
        while self.shutdown.is_running() {
            let accepted = tokio::select! {
                r = self.listener.accept() => r,
                _ = self.shutdown.notified() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("SOCKS5 connection from {}", peer);
                    tokio::spawn(serve(
                        stream,
                        peer,
                        self.negotiator.clone(),
                        Arc::clone(&self.metrics),
                        self.shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }

        tracing::info!("SOCKS5 proxy stopped");
        Ok(())
    }
}

/// Handshake task for one accepted connection; spawns the relay task on success.
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    negotiator: Negotiator,
    metrics: Arc<ProxyMetrics>,
    shutdown: Shutdown,
) {
    metrics.increment_connections();
    let _ = stream.set_nodelay(true);

    let negotiated = match negotiator.negotiate(stream).await {
        Ok(negotiated) => negotiated,
        Err(e) => {
            if e.is_protocol() {
                metrics.increment_protocol_errors();
            } else {
                metrics.increment_connection_errors();
            }
            tracing::debug!("Handshake with {} failed: {}", peer, e);
            metrics.decrement_connections();
            return;
        }
    };

    metrics.increment_established();
    let destination = negotiated.destination;
    let mut relay = Relay::new(negotiated.pair, shutdown).with_metrics(Arc::clone(&metrics));

    tokio::spawn(async move {
        match relay.run().await {
            Ok(stats) => {
                tracing::debug!(
                    "Relay {} -> {} closed ({:?}): {} bytes out, {} bytes in",
                    peer,
                    destination,
                    stats.closed_by,
                    stats.bytes_outbound,
                    stats.bytes_inbound
                );
            }
            Err(e) => {
                metrics.increment_connection_errors();
                tracing::debug!("Relay {} -> {} failed: {}", peer, destination, e);
            }
        }
        metrics.decrement_connections();
    });
}
