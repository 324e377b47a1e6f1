//! TCP half of a fallback bridge.
//!
//! # Responsibilities
//! - Open one outbound connection to the fixed backend per fallback
//! - Queue client bytes that arrive while the outbound connect is pending
//! - Flush the queue in arrival order, then relay directly both ways
//! - Propagate half-closes; tear the pair down on the first transport error
//!
//! # Design Decisions
//! - No retry or reconnect: a failed connect or a later transport error
//!   permanently ends the pair
//! - The backend direction is never buffered beyond the transport itself

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read chunk size while the outbound connect is pending.
const READ_CHUNK: usize = 8 * 1024;

/// Error cases that permanently end a bridge pair.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The outbound connect failed; the pair never came up.
    #[error("backend connect failed: {0}")]
    Connect(#[source] io::Error),
    /// A transport error on either socket after the pair was live.
    #[error("bridge relay failed: {0}")]
    Relay(#[source] io::Error),
}

/// Relays one fallback connection to the fixed backend.
pub struct ConnectionBridge {
    backend_addr: SocketAddr,
}

impl ConnectionBridge {
    pub fn new(backend_addr: SocketAddr) -> Self {
        Self { backend_addr }
    }

    /// Start the outbound connect, queueing client bytes that arrive while
    /// it is pending. The queue is flushed when the relay starts.
    pub async fn establish<C>(&self, client: C) -> Result<EstablishedBridge<C, TcpStream>, BridgeError>
    where
        C: AsyncRead + Unpin,
    {
        let (client, backend, pending) =
            await_backend(client, TcpStream::connect(self.backend_addr)).await?;
        let local_addr = backend.local_addr().map_err(BridgeError::Connect)?;
        Ok(EstablishedBridge {
            client,
            backend,
            pending,
            local_addr,
        })
    }
}

/// Drive `connect` to completion while collecting client bytes in arrival
/// order. A client EOF during the connect stops reading; the EOF re-surfaces
/// during the relay and half-closes the backend then.
async fn await_backend<C, F, B>(mut client: C, connect: F) -> Result<(C, B, Vec<Bytes>), BridgeError>
where
    C: AsyncRead + Unpin,
    F: Future<Output = io::Result<B>>,
{
    let mut pending: Vec<Bytes> = Vec::new();
    let mut client_eof = false;
    tokio::pin!(connect);

    let backend = loop {
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);
        tokio::select! {
            connected = &mut connect => break connected.map_err(BridgeError::Connect)?,
            read = client.read_buf(&mut chunk), if !client_eof => match read {
                Ok(0) => client_eof = true,
                Ok(_) => pending.push(chunk.freeze()),
                Err(e) => return Err(BridgeError::Relay(e)),
            },
        }
    };

    Ok((client, backend, pending))
}

/// A bridge pair whose outbound connect has completed.
pub struct EstablishedBridge<C, B> {
    client: C,
    backend: B,
    pending: Vec<Bytes>,
    local_addr: SocketAddr,
}

impl<C, B> EstablishedBridge<C, B>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    /// Local address the outbound socket bound to. The datagram binding
    /// co-locates here so the backend sees one source address per client.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flush queued bytes in arrival order, then relay both directions
    /// until each side finishes. EOF on one side half-closes the other;
    /// the first transport error tears the pair down.
    ///
    /// Returns (client→backend, backend→client) byte counts.
    pub async fn relay(self) -> Result<(u64, u64), BridgeError> {
        let Self {
            client,
            mut backend,
            mut pending,
            ..
        } = self;

        let queued: usize = pending.iter().map(|chunk| chunk.len()).sum();
        for chunk in pending.drain(..) {
            backend.write_all(&chunk).await.map_err(BridgeError::Relay)?;
        }
        if queued > 0 {
            tracing::trace!(queued_bytes = queued, "Flushed pre-connect queue");
        }

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

        let uplink = async {
            let copied = tokio::io::copy(&mut client_rd, &mut backend_wr).await?;
            backend_wr.shutdown().await?;
            Ok::<_, io::Error>(queued as u64 + copied)
        };
        let downlink = async {
            let copied = tokio::io::copy(&mut backend_rd, &mut client_wr).await?;
            client_wr.shutdown().await?;
            Ok::<_, io::Error>(copied)
        };
        tokio::pin!(uplink);
        tokio::pin!(downlink);

        let mut sent = None;
        let mut received = None;
        while sent.is_none() || received.is_none() {
            tokio::select! {
                result = &mut uplink, if sent.is_none() => {
                    sent = Some(result.map_err(BridgeError::Relay)?);
                }
                result = &mut downlink, if received.is_none() => {
                    received = Some(result.map_err(BridgeError::Relay)?);
                }
            }
        }

        Ok((sent.unwrap_or(0), received.unwrap_or(0)))
    }
}
