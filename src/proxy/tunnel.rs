//! Forwarding of sniffed upgrade requests over HTTP/1.1.
//!
//! # Responsibilities
//! - Replay the upgrade request upstream with upgrades enabled
//! - Relay the upstream status line and headers onto the raw socket
//! - Splice both sockets after a `101`, or pipe the body otherwise
//! - Answer a raw `502` when the upstream cannot be reached

use axum::http::{HeaderMap, Response, StatusCode, Version};
use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::headers::HeaderBlock;
use super::upstream::{self, Alpn};
use super::{Proxy, ProxyError};
use crate::http::response::RAW_BAD_GATEWAY;
use crate::net::rewind::RawSocket;
use crate::net::sniff::UpgradeRequest;
use crate::routing::Captures;

impl Proxy {
    /// Tunnel an upgrade request to the resolved upstream.
    ///
    /// Returns once both directions are closed.
    pub async fn forward_upgrade(&self, request: UpgradeRequest, mut socket: RawSocket, captures: Captures) {
        let method = request.method.clone();
        let path = request.route_path().to_string();

        let response = match self.open_upgrade(&request, &captures).await {
            Ok(response) => response,
            Err(err) => {
                if let Err(write_err) = reject(&mut socket).await {
                    tracing::debug!(error = %write_err, "Could not deliver 502 to client");
                }
                self.report("upgrade", &method, &path, &err);
                return;
            }
        };

        if let Err(err) = relay(response, socket).await {
            self.report("upgrade", &method, &path, &err);
        }
    }

    async fn open_upgrade(
        &self,
        request: &UpgradeRequest,
        captures: &Captures,
    ) -> Result<Response<Incoming>, ProxyError> {
        let upstream = self.resolve(HeaderBlock::from_upgrade(request), captures)?;
        let outbound = upstream.http1_request(&request.method, Empty::<Bytes>::new())?;

        let io = upstream::connect(&upstream.url, &upstream.options, Alpn::Http1).await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

        let url = upstream.url.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.with_upgrades().await {
                tracing::debug!(upstream = %url, error = %err, "Upstream connection ended with error");
            }
        });

        tracing::debug!(upstream = %upstream.url, path = %upstream.path(), "Forwarding upgrade");
        Ok(sender.send_request(outbound).await?)
    }
}

async fn reject(socket: &mut RawSocket) -> std::io::Result<()> {
    socket.write_all(RAW_BAD_GATEWAY).await?;
    socket.shutdown().await
}

/// Write the upstream answer to the client, then splice or drain.
async fn relay(response: Response<Incoming>, mut socket: RawSocket) -> Result<(), ProxyError> {
    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let head = encode_head(response.version(), response.status(), response.headers(), false);
        socket.write_all(&head).await.map_err(ProxyError::Downstream)?;

        let upgraded = hyper::upgrade::on(response).await?;
        let mut upstream = TokioIo::new(upgraded);
        match tokio::io::copy_bidirectional(&mut socket, &mut upstream).await {
            Ok((sent, received)) => {
                tracing::debug!(sent, received, "Tunnel closed");
            }
            Err(err) => {
                tracing::debug!(error = %err, "Tunnel ended with error");
            }
        }
        return Ok(());
    }

    // The body is written decoded, so chunked framing cannot be advertised.
    let head = encode_head(response.version(), response.status(), response.headers(), true);
    socket.write_all(&head).await.map_err(ProxyError::Downstream)?;
    pipe_body(response.into_body(), &mut socket).await?;
    socket.shutdown().await.map_err(ProxyError::Downstream)
}

async fn pipe_body<W: AsyncWrite + Unpin>(mut body: Incoming, out: &mut W) -> Result<(), ProxyError> {
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            out.write_all(&data).await.map_err(ProxyError::Downstream)?;
        }
    }
    out.flush().await.map_err(ProxyError::Downstream)
}

/// Serialize a response head as HTTP/1.x text.
fn encode_head(version: Version, status: StatusCode, headers: &HeaderMap, drop_framing: bool) -> BytesMut {
    let version = if version == Version::HTTP_10 { "1.0" } else { "1.1" };
    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(
        format!(
            "HTTP/{version} {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in headers {
        if drop_framing && name == axum::http::header::TRANSFER_ENCODING {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn switching_protocols_head() {
        let mut headers = HeaderMap::new();
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("connection", HeaderValue::from_static("Upgrade"));

        let head = encode_head(Version::HTTP_11, StatusCode::SWITCHING_PROTOCOLS, &headers, false);
        assert_eq!(
            &head[..],
            b"HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\nconnection: Upgrade\r\n\r\n"
        );
    }

    #[test]
    fn plain_response_head_drops_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let head = encode_head(Version::HTTP_11, StatusCode::NOT_FOUND, &headers, true);
        let text = std::str::from_utf8(&head).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!text.contains("transfer-encoding"));
        assert!(text.contains("content-type: text/plain\r\n"));
    }
}
