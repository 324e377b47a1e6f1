//! End-to-end bridging through the full proxy: TCP ordering and the
//! correlated UDP channel.

use std::time::Duration;

use fallback_proxy::config::ProxyConfig;
use fallback_proxy::lifecycle::Shutdown;
use fallback_proxy::proxy::Proxy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

mod common;

async fn spawn_proxy(backend_address: String) -> (std::net::SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ProxyConfig::default();
    config.listener.bind_address = addr.to_string();
    config.backend.address = backend_address;

    let shutdown = Shutdown::new();
    let proxy = Proxy::new(config, common::page_handler());
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        proxy.run(listener, shutdown_rx).await.unwrap();
    });

    (addr, shutdown)
}

#[tokio::test]
async fn relays_client_bytes_to_backend_in_order() {
    let (backend_addr, mut chunks) = common::start_capture_backend().await;
    let (proxy_addr, shutdown) = spawn_proxy(backend_addr.to_string()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    // The handshake races the outbound connect; later writes take the
    // direct path. Both must reach the backend in client order.
    client.write_all(b"BZFLAG\n\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.write_all(b"enter game").await.unwrap();
    client.shutdown().await.unwrap();

    let expected = b"BZFLAG\n\nenter game";
    let mut received = Vec::new();
    while received.len() < expected.len() {
        let chunk = timeout(Duration::from_secs(2), chunks.recv())
            .await
            .expect("backend received too little")
            .expect("capture backend closed");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, expected);
    shutdown.trigger();
}

#[tokio::test]
async fn http_requests_do_not_reach_the_backend() {
    let (backend_addr, mut chunks) = common::start_capture_backend().await;
    let (proxy_addr, shutdown) = spawn_proxy(backend_addr.to_string()).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let body = client
        .get(format!("http://{}/", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Success");

    assert!(chunks.try_recv().is_err());
    shutdown.trigger();
}

#[tokio::test]
async fn bridges_udp_alongside_fallback_tcp() {
    // Backend shares one port between its TCP listener and UDP socket,
    // the way the game server does.
    let backend_tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_tcp.local_addr().unwrap();
    let backend_udp = UdpSocket::bind(backend_addr).await.unwrap();

    let (proxy_addr, shutdown) = spawn_proxy(backend_addr.to_string()).await;

    // The client, too, shares one local port between TCP and UDP.
    let (mut client_tcp, client_udp) = common::connect_with_udp(proxy_addr).await;
    client_tcp.write_all(b"BZFLAG\n\n").await.unwrap();

    // The backend sees the handshake over TCP; by the time it arrives, the
    // datagram binding at the bridge's address exists.
    let (mut backend_conn, bridge_addr) = backend_tcp.accept().await.unwrap();
    let mut handshake = [0u8; 8];
    timeout(Duration::from_secs(2), backend_conn.read_exact(&mut handshake))
        .await
        .expect("handshake timed out")
        .unwrap();
    assert_eq!(&handshake, b"BZFLAG\n\n");

    // Client → backend: the datagram arrives from the bridge's co-located
    // TCP/UDP address.
    client_udp.send_to(b"c2s", proxy_addr).await.unwrap();
    let mut dgram = [0u8; 64];
    let (n, from) = timeout(Duration::from_secs(2), backend_udp.recv_from(&mut dgram))
        .await
        .expect("client datagram never arrived")
        .unwrap();
    assert_eq!(&dgram[..n], b"c2s");
    assert_eq!(from, bridge_addr);

    // Backend → client: any backend-side port works, and the reply reaches
    // the client from the port it originally talked to.
    let other_port = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    other_port.send_to(b"s2c", bridge_addr).await.unwrap();
    let (n, from) = timeout(Duration::from_secs(2), client_udp.recv_from(&mut dgram))
        .await
        .expect("backend datagram never arrived")
        .unwrap();
    assert_eq!(&dgram[..n], b"s2c");
    assert_eq!(from, proxy_addr);

    shutdown.trigger();
}

#[tokio::test]
async fn backend_half_close_propagates_to_client() {
    let backend_tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_tcp.local_addr().unwrap();
    let (proxy_addr, shutdown) = spawn_proxy(backend_addr.to_string()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"BZFLAG\n\n").await.unwrap();

    let (mut backend_conn, _) = backend_tcp.accept().await.unwrap();
    let mut handshake = [0u8; 8];
    backend_conn.read_exact(&mut handshake).await.unwrap();

    backend_conn.write_all(b"bye").await.unwrap();
    backend_conn.shutdown().await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(2), client.read_to_end(&mut received))
        .await
        .expect("client never saw the half-close")
        .unwrap();
    assert_eq!(received, b"bye");
    shutdown.trigger();
}
