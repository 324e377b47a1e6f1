//! Protocol-sniffing HTTP server with raw fallback.
//!
//! # Responsibilities
//! - Own the listening TCP socket and accept connections
//! - Classify each connection as HTTP until proven otherwise
//! - Hand non-HTTP connections to the fallback consumer with their
//!   original byte stream intact
//! - Surface parse failures that are not eligible for fallback
//!
//! # Connection States
//! ```text
//! NEW ──(complete request head)──▶ HTTP (served by hyper, upgrades included)
//! NEW ──(parse failure, fallback consumer)──▶ FALLEN_BACK
//! NEW ──(parse failure, no consumer)──▶ REJECTED (400 by default)
//! HTTP ──(later protocol error)──▶ REJECTED (never falls back)
//! ```
//! A connection takes exactly one of these paths; the per-connection task
//! owns the classification state, so no shared bookkeeping is needed.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use crate::observability::metrics;
use crate::sniff::classifier::{classify, ParseFailure, Verdict};
use crate::sniff::stream::ReplayStream;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Boxed response future returned by request handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Response<Full<Bytes>>> + Send>>;

/// Handler invoked for every fully parsed HTTP request.
pub type RequestHandler = Arc<dyn Fn(Request<Incoming>) -> HandlerFuture + Send + Sync>;

/// A connection classified as non-HTTP.
///
/// `stream` yields the complete original byte sequence: everything consumed
/// during classification is replayed before live socket reads.
#[derive(Debug)]
pub struct FallbackConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub stream: ReplayStream<TcpStream>,
}

/// Why a connection was rejected.
#[derive(Debug)]
pub enum RejectReason {
    /// The first bytes failed to parse and no fallback consumer is registered.
    Preface(ParseFailure),
    /// The HTTP layer failed after the connection was classified as HTTP.
    Established(hyper::Error),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Preface(failure) => write!(f, "{}", failure),
            RejectReason::Established(e) => write!(f, "http connection error: {}", e),
        }
    }
}

/// An HTTP parse failure that was not eligible for fallback.
#[derive(Debug)]
pub struct RejectedConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub reason: RejectReason,
    /// The raw socket, present when the failure happened before the
    /// connection was classified as HTTP. `None` once the HTTP layer owned
    /// the transport; it has already produced its default 400 response.
    pub stream: Option<ReplayStream<TcpStream>>,
}

/// A connection switched to another protocol via HTTP upgrade.
pub struct UpgradedConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    /// Head of the request that initiated the upgrade.
    pub head: hyper::http::request::Parts,
    pub io: hyper::upgrade::Upgraded,
}

/// HTTP server that classifies each connection by its first bytes and hands
/// non-HTTP connections off raw instead of closing them.
pub struct SniffServer {
    max_sniff_bytes: usize,
    on_request: RequestHandler,
    fallback_tx: Option<mpsc::Sender<FallbackConnection>>,
    rejected_tx: Option<mpsc::Sender<RejectedConnection>>,
    upgrade_tx: Option<mpsc::Sender<UpgradedConnection>>,
}

impl SniffServer {
    pub fn new(max_sniff_bytes: usize, on_request: RequestHandler) -> Self {
        Self {
            max_sniff_bytes,
            on_request,
            fallback_tx: None,
            rejected_tx: None,
            upgrade_tx: None,
        }
    }

    /// Register the fallback consumer. Without one, non-HTTP connections
    /// are rejected instead of handed off.
    pub fn with_fallback(mut self, tx: mpsc::Sender<FallbackConnection>) -> Self {
        self.fallback_tx = Some(tx);
        self
    }

    /// Register a consumer for rejections. Without one, the default
    /// `400 Bad Request` is written where the socket allows it.
    pub fn with_rejected(mut self, tx: mpsc::Sender<RejectedConnection>) -> Self {
        self.rejected_tx = Some(tx);
        self
    }

    /// Register a consumer for protocol upgrades. Without one, requests
    /// carrying an `Upgrade` header are served as ordinary HTTP.
    pub fn with_upgrade(mut self, tx: mpsc::Sender<UpgradedConnection>) -> Self {
        self.upgrade_tx = Some(tx);
        self
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "Sniffing server listening");

        let server = Arc::new(self);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&server);
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sniffing server stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new();
        metrics::record_connection();
        tracing::debug!(connection_id = %id, peer = %peer, "Connection accepted");

        let mut sniffed = BytesMut::with_capacity(1024);
        loop {
            match stream.read_buf(&mut sniffed).await {
                Ok(0) => {
                    tracing::debug!(connection_id = %id, peer = %peer, "Closed before classification");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Read failed during classification");
                    return;
                }
            }
            match classify(&sniffed, self.max_sniff_bytes) {
                Verdict::Undecided => continue,
                Verdict::Http => {
                    let stream = ReplayStream::new(sniffed.freeze(), stream);
                    self.serve_http(stream, id, peer).await;
                    return;
                }
                Verdict::NotHttp(failure) => {
                    let stream = ReplayStream::new(sniffed.freeze(), stream);
                    self.dispose_non_http(stream, id, peer, failure).await;
                    return;
                }
            }
        }
    }

    /// Serve a connection whose first bytes form a valid request head.
    /// From here on it is HTTP for good: later protocol errors reject,
    /// they never fall back.
    async fn serve_http(&self, stream: ReplayStream<TcpStream>, id: ConnectionId, peer: SocketAddr) {
        tracing::debug!(connection_id = %id, peer = %peer, "Connection classified as HTTP");

        let handler = Arc::clone(&self.on_request);
        let upgrade_tx = self.upgrade_tx.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            let upgrade_tx = upgrade_tx.clone();
            async move {
                if let Some(tx) = upgrade_tx {
                    if req.headers().contains_key(header::UPGRADE) {
                        return Ok::<_, Infallible>(start_upgrade(req, id, peer, tx));
                    }
                }
                let start = Instant::now();
                let method = req.method().to_string();
                let response = handler(req).await;
                metrics::record_request(&method, response.status().as_u16(), start);
                Ok(response)
            }
        });

        let io = TokioIo::new(stream);
        let conn = http1::Builder::new().serve_connection(io, service);
        let result = if self.upgrade_tx.is_some() {
            conn.with_upgrades().await
        } else {
            conn.await
        };

        if let Err(e) = result {
            // hyper has already written its 400 where the socket allowed it.
            self.reject(RejectedConnection {
                id,
                peer,
                reason: RejectReason::Established(e),
                stream: None,
            })
            .await;
        }
    }

    /// Dispose of a connection whose first bytes are not HTTP: fall back if
    /// a consumer is registered, otherwise reject.
    async fn dispose_non_http(
        &self,
        stream: ReplayStream<TcpStream>,
        id: ConnectionId,
        peer: SocketAddr,
        failure: ParseFailure,
    ) {
        if let Some(tx) = &self.fallback_tx {
            tracing::debug!(
                connection_id = %id,
                peer = %peer,
                reason = %failure,
                buffered = stream.remaining_prefix(),
                "Connection fell back to raw relay"
            );
            metrics::record_fallback();
            if tx
                .send(FallbackConnection { id, peer, stream })
                .await
                .is_err()
            {
                tracing::warn!(connection_id = %id, "Fallback consumer gone, dropping connection");
            }
            return;
        }

        self.reject(RejectedConnection {
            id,
            peer,
            reason: RejectReason::Preface(failure),
            stream: Some(stream),
        })
        .await;
    }

    async fn reject(&self, rejected: RejectedConnection) {
        metrics::record_rejected();
        tracing::debug!(
            connection_id = %rejected.id,
            peer = %rejected.peer,
            reason = %rejected.reason,
            "Connection rejected"
        );

        let rejected = match &self.rejected_tx {
            Some(tx) => match tx.send(rejected).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(rejected)) => rejected,
            },
            None => rejected,
        };

        // Default action: a minimal 400 if the socket still accepts writes,
        // otherwise just drop the connection.
        if let Some(mut stream) = rejected.stream {
            if stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .await
                .is_ok()
            {
                let _ = stream.shutdown().await;
            }
        }
    }
}

/// Answer `101 Switching Protocols` and emit the upgraded IO once hyper
/// completes the switch.
fn start_upgrade(
    mut req: Request<Incoming>,
    id: ConnectionId,
    peer: SocketAddr,
    tx: mpsc::Sender<UpgradedConnection>,
) -> Response<Full<Bytes>> {
    let protocol = req.headers().get(header::UPGRADE).cloned();
    let on_upgrade = hyper::upgrade::on(&mut req);
    let (head, _body) = req.into_parts();

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(io) => {
                tracing::debug!(connection_id = %id, peer = %peer, "Connection upgraded");
                if tx
                    .send(UpgradedConnection { id, peer, head, io })
                    .await
                    .is_err()
                {
                    tracing::warn!(connection_id = %id, "Upgrade consumer gone, dropping connection");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Upgrade failed");
            }
        }
    });

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade");
    if let Some(protocol) = protocol {
        response = response.header(header::UPGRADE, protocol);
    }
    response
        .body(Full::default())
        .expect("static response head")
}
