//! Socket wrapper that replays sniffed bytes ahead of live reads.
//!
//! Classification consumes bytes off the socket before a connection's fate
//! is known. When the connection is handed off raw, those bytes are
//! re-injected here so the consumer observes the complete original byte
//! sequence with no gap and no duplication; they may contain the entire
//! handshake of the non-HTTP protocol.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A stream yielding a captured prefix before reads from the inner socket.
///
/// Writes pass straight through at all times.
#[derive(Debug)]
pub struct ReplayStream<S = TcpStream> {
    prefix: Bytes,
    inner: S,
}

impl<S> ReplayStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes still waiting to be replayed.
    pub fn remaining_prefix(&self) -> usize {
        self.prefix.len()
    }

    pub fn into_parts(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl ReplayStream<TcpStream> {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            let chunk = this.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn replays_prefix_before_live_bytes() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut stream = ReplayStream::new(Bytes::from_static(b"BZFLAG\n\n"), near);

        far.write_all(b"more data").await.unwrap();
        far.shutdown().await.unwrap();

        let mut observed = Vec::new();
        stream.read_to_end(&mut observed).await.unwrap();
        assert_eq!(observed, b"BZFLAG\n\nmore data");
    }

    #[tokio::test]
    async fn prefix_survives_small_read_buffers() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut stream = ReplayStream::new(Bytes::from_static(b"abcdef"), near);
        far.shutdown().await.unwrap();

        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(stream.remaining_prefix(), 2);

        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(stream.remaining_prefix(), 0);
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut stream = ReplayStream::new(Bytes::from_static(b"unread prefix"), near);

        stream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn empty_prefix_reads_inner_directly() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut stream = ReplayStream::new(Bytes::new(), near);
        far.write_all(b"direct").await.unwrap();

        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"direct");
    }
}
