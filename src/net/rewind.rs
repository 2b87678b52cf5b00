//! Replay of bytes consumed during protocol detection.
//!
//! The listener has to read ahead to tell HTTP/2 from an HTTP/1.x upgrade
//! request. Whatever it read is handed back to the next consumer through
//! [`Rewind`], which yields the buffered prefix before reading from the
//! underlying transport again.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Object-safe bound for any duplex transport (TCP, TLS, in-memory pipes).
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased duplex transport.
pub type BoxedIo = Box<dyn Io>;

/// A raw client socket carrying an upgrade request, with any bytes read past
/// the request head still available for reading.
pub type RawSocket = Rewind<BoxedIo>;

/// Transport wrapper that replays `prefix` before reading from `inner`.
#[derive(Debug)]
pub struct Rewind<T> {
    prefix: Bytes,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(inner: T, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }

    /// Bytes not yet handed to a reader.
    pub fn pending(&self) -> &[u8] {
        &self.prefix
    }

    pub fn into_inner(self) -> (T, Bytes) {
        (self.inner, self.prefix)
    }
}

impl Rewind<BoxedIo> {
    /// Box `io` into a [`RawSocket`].
    pub fn boxed<T: Io>(io: T, prefix: Bytes) -> Self {
        Self::new(Box::new(io), prefix)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
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
    async fn test_prefix_is_read_first() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b" world").await.unwrap();
        drop(server);

        let mut rewind = Rewind::new(client, Bytes::from_static(b"hello"));
        let mut out = String::new();
        rewind.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_prefix_split_across_small_reads() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut rewind = Rewind::new(client, Bytes::from_static(b"abcdef"));
        let mut chunk = [0u8; 4];
        let n = rewind.read(&mut chunk).await.unwrap();
        assert_eq!(&chunk[..n], b"abcd");
        assert_eq!(rewind.pending(), b"ef");
    }
}
