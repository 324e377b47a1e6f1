//! Coordinator wiring the sniffing server to the bridges.
//!
//! # Data Flow
//! ```text
//! TCP connection → sniff::SniffServer
//!     → HTTP: request handler (served in place)
//!     → fallback: bridge::ConnectionBridge → backend TCP
//!         → on connect completion: bridge::BindingTable binding at the
//!           outbound socket's local address
//! UDP datagram → shared socket → bridge::BindingTable → backend UDP
//! ```
//!
//! # Design Decisions
//! - The shared UDP socket binds to the TCP listener's own host/port; the
//!   two transports have disjoint port spaces, so both binds succeed
//! - Errors in one bridge never affect another; nothing is retried

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};

use crate::bridge::{BindingTable, ConnectionBridge};
use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::sniff::{FallbackConnection, RequestHandler, SniffServer};

/// Capacity of the fallback hand-off channel.
const FALLBACK_QUEUE: usize = 32;

/// Fatal startup and wiring errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),
    #[error("backend lookup for '{0}' failed: {1}")]
    Lookup(String, #[source] std::io::Error),
    #[error("backend address '{0}' did not resolve")]
    BackendResolve(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The proxy: one listener shared between HTTP and the game protocol,
/// one fixed backend for everything that is not HTTP.
pub struct Proxy {
    config: ProxyConfig,
    on_request: RequestHandler,
}

impl Proxy {
    /// Create a proxy. `on_request` handles ordinary HTTP requests; the
    /// proxy itself does nothing further with them.
    pub fn new(config: ProxyConfig, on_request: RequestHandler) -> Self {
        Self { config, on_request }
    }

    /// Run on a pre-bound listener until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProxyError> {
        let local_addr = listener.local_addr()?;
        let shared_udp = Arc::new(
            UdpSocket::bind(local_addr)
                .await
                .map_err(|e| ProxyError::Bind(local_addr.to_string(), e))?,
        );
        tracing::info!(address = %local_addr, "Shared UDP socket bound");

        let backend_addr = resolve_backend(&self.config.backend.address).await?;
        tracing::info!(backend = %backend_addr, "Relaying fallback traffic");

        let table = Arc::new(BindingTable::new(Arc::clone(&shared_udp)));
        let dispatch = tokio::spawn({
            let table = Arc::clone(&table);
            async move { table.dispatch().await }
        });

        let (fallback_tx, mut fallback_rx) = mpsc::channel(FALLBACK_QUEUE);
        let consumer = tokio::spawn({
            let table = Arc::clone(&table);
            async move {
                while let Some(conn) = fallback_rx.recv().await {
                    let table = Arc::clone(&table);
                    tokio::spawn(bridge_connection(conn, backend_addr, table));
                }
            }
        });

        let server = SniffServer::new(self.config.listener.max_sniff_bytes, self.on_request)
            .with_fallback(fallback_tx);
        let result = server.run(listener, shutdown).await;

        dispatch.abort();
        consumer.abort();
        result.map_err(ProxyError::from)
    }
}

async fn resolve_backend(address: &str) -> Result<SocketAddr, ProxyError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| ProxyError::Lookup(address.to_string(), e))?
        .next()
        .ok_or_else(|| ProxyError::BackendResolve(address.to_string()))
}

/// Run one fallback connection to completion: connect, register the
/// datagram binding at the outbound socket's address, relay until done.
async fn bridge_connection(
    conn: FallbackConnection,
    backend_addr: SocketAddr,
    table: Arc<BindingTable>,
) {
    let FallbackConnection { id, peer, stream } = conn;

    let bridge = ConnectionBridge::new(backend_addr);
    let established = match bridge.establish(stream).await {
        Ok(established) => established,
        Err(e) => {
            tracing::warn!(connection_id = %id, peer = %peer, error = %e, "Bridge failed to reach backend");
            return;
        }
    };
    metrics::record_bridge_opened();

    // The datagram channel rides on the TCP endpoint's local address. If
    // it cannot come up, the TCP relay still runs.
    let _datagram = match table
        .bind(peer, backend_addr, established.local_addr())
        .await
    {
        Ok(binding) => Some(binding),
        Err(e) => {
            tracing::warn!(connection_id = %id, peer = %peer, error = %e, "Datagram binding failed");
            None
        }
    };

    match established.relay().await {
        Ok((sent, received)) => {
            metrics::record_bridge_traffic(sent, received);
            tracing::debug!(
                connection_id = %id,
                peer = %peer,
                bytes_sent = sent,
                bytes_received = received,
                "Bridge finished"
            );
        }
        Err(e) => {
            tracing::warn!(connection_id = %id, peer = %peer, error = %e, "Bridge failed");
        }
    }
    metrics::record_bridge_closed();
}
