//! Detection of HTTP/1.x protocol-upgrade requests on raw connections.
//!
//! # Responsibilities
//! - Read a request head up to the blank line (bounded)
//! - Parse the request line and `Name: value` header lines
//! - Decide whether the request is an upgrade candidate
//!
//! # Design Decisions
//! - Header names are lowercased; names and values lose a single pair of
//!   surrounding apostrophes
//! - Malformed input is not an error, the connection is simply not ours

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed HTTP/1.x request head received on a raw socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header pairs in arrival order, names lowercased.
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Parse a complete request head (terminator included or not).
    pub fn parse(head: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(head).ok()?;
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

        let mut request_line = lines.next()?.split(' ');
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let version = request_line.next()?.to_string();
        if method.is_empty() || path.is_empty() {
            return None;
        }

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(": ")?;
                Some((unquote(name).to_ascii_lowercase(), unquote(value).to_string()))
            })
            .collect();

        Some(Self {
            method,
            path,
            version,
            headers,
        })
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request target without its query string, used for route matching.
    pub fn route_path(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(path, _)| path)
    }

    /// True when the request asks for a connection upgrade to a named protocol.
    pub fn is_upgrade_candidate(&self) -> bool {
        let connection_upgrade = self
            .header("connection")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        let upgrade = self.header("upgrade").map(str::trim).unwrap_or("");
        connection_upgrade && !upgrade.is_empty()
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// Outcome of reading a request head from a raw connection.
#[derive(Debug)]
pub enum Sniffed {
    /// An upgrade candidate plus the bytes that followed its head.
    Upgrade(UpgradeRequest, Bytes),
    /// Well-formed head that is not an upgrade request.
    NotUpgrade(UpgradeRequest),
    /// No terminator within the limit, EOF first, or unparsable head.
    Malformed,
}

/// Read from `io` until the end of a request head, starting with the bytes
/// already in `buf`.
pub async fn read_upgrade_request<R>(io: &mut R, mut buf: BytesMut, limit: usize) -> io::Result<Sniffed>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_terminator(&buf) {
            let head = buf.split_to(end + HEAD_TERMINATOR.len());
            return Ok(match UpgradeRequest::parse(&head) {
                Some(request) if request.is_upgrade_candidate() => {
                    Sniffed::Upgrade(request, buf.freeze())
                }
                Some(request) => Sniffed::NotUpgrade(request),
                None => Sniffed::Malformed,
            });
        }

        if buf.len() >= limit {
            return Ok(Sniffed::Malformed);
        }

        if io.read_buf(&mut buf).await? == 0 {
            return Ok(Sniffed::Malformed);
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const WS_REQUEST: &str = "GET /ws HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        \r\n";

    #[test]
    fn test_parse_request_line_and_headers() {
        let request = UpgradeRequest::parse(WS_REQUEST.as_bytes()).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/ws");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.header("sec-websocket-key"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(request.headers[0].0, "host");
        assert!(request.is_upgrade_candidate());
    }

    #[test]
    fn test_quoted_tokens_are_unquoted() {
        let head = b"GET / HTTP/1.1\r\n'Connection': 'upgrade'\r\nUpgrade: 'foo'\r\n\r\n";
        let request = UpgradeRequest::parse(head).unwrap();
        assert_eq!(request.header("connection"), Some("upgrade"));
        assert_eq!(request.header("upgrade"), Some("foo"));
        assert!(request.is_upgrade_candidate());
    }

    #[test]
    fn test_connection_token_list() {
        let head = b"GET / HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\r\n";
        assert!(UpgradeRequest::parse(head).unwrap().is_upgrade_candidate());
    }

    #[test]
    fn test_missing_upgrade_is_not_candidate() {
        let head = b"GET / HTTP/1.1\r\nConnection: upgrade\r\nUpgrade: \r\n\r\n";
        assert!(!UpgradeRequest::parse(head).unwrap().is_upgrade_candidate());

        let head = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";
        assert!(!UpgradeRequest::parse(head).unwrap().is_upgrade_candidate());
    }

    #[test]
    fn route_path_drops_query() {
        let head = b"GET /ws?room=1&x=2 HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        let request = UpgradeRequest::parse(head).unwrap();
        assert_eq!(request.route_path(), "/ws");
        assert_eq!(request.path, "/ws?room=1&x=2");

        let head = b"GET /plain HTTP/1.1\r\n\r\n";
        assert_eq!(UpgradeRequest::parse(head).unwrap().route_path(), "/plain");
    }

    #[test]
    fn test_garbage_request_line() {
        assert!(UpgradeRequest::parse(b"\r\n\r\n").is_none());
        assert!(UpgradeRequest::parse(b"GET\r\n\r\n").is_none());
    }

    #[tokio::test]
    async fn test_read_keeps_trailing_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut payload = WS_REQUEST.as_bytes().to_vec();
        payload.extend_from_slice(&[0x81, 0x80]);
        client.write_all(&payload[..10]).await.unwrap();
        client.write_all(&payload[10..]).await.unwrap();

        match read_upgrade_request(&mut server, BytesMut::new(), 8192).await.unwrap() {
            Sniffed::Upgrade(request, rest) => {
                assert_eq!(request.path, "/ws");
                assert_eq!(&rest[..], &[0x81, 0x80]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_limit_without_terminator_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[b'a'; 64]).await.unwrap();

        let sniffed = read_upgrade_request(&mut server, BytesMut::new(), 32).await.unwrap();
        assert!(matches!(sniffed, Sniffed::Malformed));
    }

    #[tokio::test]
    async fn test_eof_before_terminator_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        drop(client);

        let sniffed = read_upgrade_request(&mut server, BytesMut::new(), 8192).await.unwrap();
        assert!(matches!(sniffed, Sniffed::Malformed));
    }

    #[tokio::test]
    async fn test_plain_request_is_not_upgrade() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();

        let sniffed = read_upgrade_request(&mut server, BytesMut::new(), 8192).await.unwrap();
        assert!(matches!(sniffed, Sniffed::NotUpgrade(r) if r.path == "/index.html"));
    }
}
