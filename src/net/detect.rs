//! Protocol detection on freshly accepted connections.
//!
//! A connection is HTTP/2 when TLS negotiated `h2` or when it opens with the
//! client connection preface. Anything else is read as an HTTP/1.x request
//! head and checked for an upgrade.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::AsyncReadExt;

use super::rewind::{BoxedIo, RawSocket, Rewind};
use super::sniff::{read_upgrade_request, Sniffed, UpgradeRequest};

/// HTTP/2 client connection preface (RFC 9113 §3.4).
pub const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub enum Detected {
    /// HTTP/2; the socket replays the preface bytes already read.
    Http2(RawSocket),
    /// Upgrade candidate; the socket replays bytes read past the head.
    Upgrade(UpgradeRequest, RawSocket),
    /// A well-formed HTTP/1.x request that does not ask for an upgrade.
    NotUpgrade(UpgradeRequest, RawSocket),
    /// Nothing we understand. Dropping closes the connection.
    Malformed,
}

impl Detected {
    pub fn label(&self) -> &'static str {
        match self {
            Detected::Http2(_) => "h2",
            Detected::Upgrade(..) => "upgrade",
            Detected::NotUpgrade(..) => "http1",
            Detected::Malformed => "malformed",
        }
    }
}

/// Classify `io`. `negotiated_h2` is true when TLS ALPN selected `h2`.
pub async fn detect(mut io: BoxedIo, negotiated_h2: bool, sniff_limit: usize) -> io::Result<Detected> {
    if negotiated_h2 {
        return Ok(Detected::Http2(Rewind::new(io, Bytes::new())));
    }

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let seen = buf.len().min(H2_PREFACE.len());
        if buf[..seen] != H2_PREFACE[..seen] {
            break;
        }
        if seen == H2_PREFACE.len() {
            return Ok(Detected::Http2(Rewind::new(io, buf.freeze())));
        }
        if io.read_buf(&mut buf).await? == 0 {
            return Ok(Detected::Malformed);
        }
    }

    Ok(match read_upgrade_request(&mut io, buf, sniff_limit).await? {
        Sniffed::Upgrade(request, rest) => Detected::Upgrade(request, Rewind::new(io, rest)),
        Sniffed::NotUpgrade(request) => Detected::NotUpgrade(request, Rewind::new(io, Bytes::new())),
        Sniffed::Malformed => Detected::Malformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn detect_bytes(input: &[u8], negotiated_h2: bool) -> Detected {
        let (client, server) = duplex(4096);
        let mut client = client;
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        detect(Box::new(server), negotiated_h2, 1024).await.unwrap()
    }

    #[tokio::test]
    async fn preface_is_http2_and_replayed() {
        let mut input = H2_PREFACE.to_vec();
        input.extend_from_slice(b"\x00\x00\x00");

        match detect_bytes(&input, false).await {
            Detected::Http2(mut socket) => {
                let mut replay = Vec::new();
                socket.read_to_end(&mut replay).await.unwrap();
                assert_eq!(replay, input);
            }
            other => panic!("expected http2, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn alpn_h2_skips_reading() {
        let detected = detect_bytes(b"", true).await;
        assert_eq!(detected.label(), "h2");
    }

    #[tokio::test]
    async fn upgrade_request_keeps_trailing_bytes() {
        let input = b"GET /ws HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n\x81\x00";

        match detect_bytes(input, false).await {
            Detected::Upgrade(request, socket) => {
                assert_eq!(request.path, "/ws");
                assert_eq!(socket.pending(), b"\x81\x00");
            }
            other => panic!("expected upgrade, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn plain_http1_is_not_upgrade() {
        let detected = detect_bytes(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", false).await;
        assert_eq!(detected.label(), "http1");
    }

    #[tokio::test]
    async fn truncated_preface_is_malformed() {
        let detected = detect_bytes(&H2_PREFACE[..10], false).await;
        assert_eq!(detected.label(), "malformed");
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let detected = detect_bytes(b"\x16\x03\x01garbage", false).await;
        assert_eq!(detected.label(), "malformed");
    }
}
