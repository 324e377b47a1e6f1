//! Datagram half of a fallback bridge.
//!
//! # Responsibilities
//! - Bind a dedicated outbound UDP socket next to the bridge's TCP endpoint
//! - Dispatch datagrams from the shared inbound socket to the right binding
//! - Forward backend datagrams to the client through the shared socket
//! - Tear the binding down with its TCP bridge
//!
//! # Design Decisions
//! - Clients are correlated by address only; the sender's port is not
//!   compared. Distinct clients behind one address are indistinguishable
//!   here and the newest binding wins, an accepted limitation of the
//!   address-based correlation the backend itself performs.
//! - UDP errors are logged and never end the TCP relay.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::observability::metrics;

/// Largest datagram accepted on either UDP socket.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Address tuple correlating one client's datagrams with its bridge.
#[derive(Debug)]
struct BindingEntry {
    /// Client address as observed on the TCP side; replies go here.
    client: SocketAddr,
    /// Fixed backend address client datagrams are forwarded to.
    backend: SocketAddr,
    /// Socket co-located with the bridge's outbound TCP endpoint.
    outbound: Arc<UdpSocket>,
}

/// Live datagram bindings over the process-wide shared inbound socket.
pub struct BindingTable {
    shared: Arc<UdpSocket>,
    entries: DashMap<IpAddr, Arc<BindingEntry>>,
}

impl BindingTable {
    pub fn new(shared: Arc<UdpSocket>) -> Self {
        Self {
            shared,
            entries: DashMap::new(),
        }
    }

    /// Create a binding for `client`, with the outbound socket bound to
    /// `local`, the address the bridge's outbound TCP connection bound
    /// to, so the backend sees consistent TCP and UDP source addresses.
    ///
    /// The returned guard removes the binding when dropped.
    pub async fn bind(
        self: &Arc<Self>,
        client: SocketAddr,
        backend: SocketAddr,
        local: SocketAddr,
    ) -> io::Result<DatagramBridge> {
        let outbound = Arc::new(UdpSocket::bind(local).await?);
        let entry = Arc::new(BindingEntry {
            client,
            backend,
            outbound,
        });
        self.entries.insert(client.ip(), Arc::clone(&entry));
        metrics::record_binding_opened();

        let pump = tokio::spawn(pump_backend_to_client(
            Arc::clone(&self.shared),
            Arc::clone(&entry),
        ));

        tracing::debug!(client = %client, local = %local, "Datagram binding created");
        Ok(DatagramBridge {
            table: Arc::clone(self),
            entry,
            pump,
        })
    }

    /// Receive loop for the shared inbound socket: each datagram is
    /// forwarded to the binding whose recorded client address matches the
    /// sender's address. Unmatched datagrams are dropped.
    pub async fn dispatch(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.shared.recv_from(&mut buf).await {
                Ok((len, sender)) => {
                    // Address-only match; the sender's port is ignored.
                    let entry = match self.entries.get(&sender.ip()) {
                        Some(entry) => Arc::clone(entry.value()),
                        None => {
                            tracing::trace!(sender = %sender, "Datagram from unknown client dropped");
                            continue;
                        }
                    };
                    if let Err(e) = entry.outbound.send_to(&buf[..len], entry.backend).await {
                        tracing::warn!(
                            client = %entry.client,
                            error = %e,
                            "Client-to-backend datagram send failed"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Shared UDP receive failed");
                }
            }
        }
    }
}

/// Forward everything received on the dedicated outbound socket to the
/// client's recorded address, whatever backend-side port it was sent from.
/// Replies leave through the shared socket so the client sees them come
/// from the port it talked to.
async fn pump_backend_to_client(shared: Arc<UdpSocket>, entry: Arc<BindingEntry>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match entry.outbound.recv_from(&mut buf).await {
            Ok((len, _from)) => {
                if let Err(e) = shared.send_to(&buf[..len], entry.client).await {
                    tracing::warn!(
                        client = %entry.client,
                        error = %e,
                        "Backend-to-client datagram send failed"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(client = %entry.client, error = %e, "Outbound UDP receive failed");
            }
        }
    }
}

/// Guard tying a datagram binding's lifetime to its TCP bridge pair.
pub struct DatagramBridge {
    table: Arc<BindingTable>,
    entry: Arc<BindingEntry>,
    pump: JoinHandle<()>,
}

impl DatagramBridge {
    /// Address of the dedicated outbound socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.entry.outbound.local_addr()
    }
}

impl Drop for DatagramBridge {
    fn drop(&mut self) {
        self.pump.abort();
        // Only remove the entry if it is still ours; a newer binding for
        // the same address must not be evicted.
        self.table
            .entries
            .remove_if(&self.entry.client.ip(), |_, current| {
                Arc::ptr_eq(current, &self.entry)
            });
        metrics::record_binding_closed();
        tracing::debug!(client = %self.entry.client, "Datagram binding removed");
    }
}
