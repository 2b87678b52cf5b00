//! Response construction shared by the HTTP/2 side and the raw upgrade side.
//!
//! # Responsibilities
//! - Build the plain-text error responses the gateway emits itself
//! - Hold the raw HTTP/1.1 replies written to sniffed sockets
//! - Strip hop-by-hop headers before relaying upstream responses
//!
//! # Design Decisions
//! - Gateway-generated bodies are `text/plain`
//! - Raw replies always carry `Connection: close`; the socket is closed after writing

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

/// Value of the default `server` header.
pub const SERVER_NAME: &str = concat!("edge-gateway/", env!("CARGO_PKG_VERSION"));

/// Reply to an upgrade request whose upstream could not be reached.
pub const RAW_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n";

/// Reply to an upgrade request nothing claimed.
pub const RAW_NOT_FOUND: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Connection-specific headers (RFC 9110 §7.6.1) plus the legacy ones proxies drop.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Plain-text response with `status` and `body`.
pub fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response
}

pub fn not_found() -> Response<Body> {
    text(StatusCode::NOT_FOUND, "Not Found")
}

/// Upstream failure. The body is empty.
pub fn bad_gateway() -> Response<Body> {
    text(StatusCode::BAD_GATEWAY, Body::empty())
}

pub fn internal_error() -> Response<Body> {
    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
