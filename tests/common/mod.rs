//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use fallback_proxy::sniff::RequestHandler;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// Request handler that responds `Success` to everything.
pub fn page_handler() -> RequestHandler {
    Arc::new(|_req: Request<Incoming>| {
        Box::pin(async { Response::new(Full::new(Bytes::from_static(b"Success"))) })
    })
}

/// Start a backend that records every chunk it receives over TCP and never
/// replies. Chunks are reported on the returned channel in arrival order.
#[allow(dead_code)]
pub async fn start_capture_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if tx.send(buf[..n].to_vec()).is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// Connect to `proxy` from a local port that also has a UDP socket bound,
/// the way the game client shares one port between both transports.
#[allow(dead_code)]
pub async fn connect_with_udp(proxy: SocketAddr) -> (TcpStream, UdpSocket) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let local = socket.local_addr().unwrap();
    let udp = UdpSocket::bind(local).await.unwrap();
    let stream = socket.connect(proxy).await.unwrap();
    (stream, udp)
}
