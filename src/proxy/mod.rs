//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP/2 stream + captures
//!     → destination.rs (resolve per request → Upstream)
//!     → upstream.rs (TCP / TLS with ALPN h2)
//!     → stream.rs (hyper http2 client, one connection per stream)
//!     → Response relayed downstream, 502 on failure
//!
//! Sniffed upgrade + raw socket + captures
//!     → destination.rs
//!     → upstream.rs (TCP / TLS with ALPN http/1.1)
//!     → tunnel.rs (hyper http1 client with upgrades)
//!     → 101: splice sockets | other: relay head + body | error: raw 502
//! ```
//!
//! # Design Decisions
//! - Every failure produces exactly one router event and one metric
//! - Nothing is pooled; each exchange owns its upstream connection

pub mod destination;
pub mod headers;
pub mod stream;
pub mod tunnel;
pub mod upstream;

pub use destination::{Destination, ProxyOptions, ResolvedTarget, Target, Upstream};
pub use headers::HeaderBlock;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::observability::metrics;
use crate::routing::{Captures, EventSink, EventSource, RouterEvent};

/// Error raised while forwarding.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid destination url `{url}`: {source}")]
    InvalidDestination {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("destination `{0}` has no usable host")]
    MissingHost(String),

    #[error("destination `{0}` has no port")]
    MissingPort(String),

    #[error("cannot read CA file {path:?}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("upstream connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("upstream tls handshake failed: {0}")]
    TlsHandshake(#[source] io::Error),

    #[error("invalid outbound request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream exchange failed: {0}")]
    Upstream(#[from] hyper::Error),

    #[error("downstream write failed: {0}")]
    Downstream(#[source] io::Error),
}

/// A registered proxy target.
#[derive(Debug)]
pub struct Proxy {
    destination: Destination,
    options: ProxyOptions,
    events: EventSink,
}

impl Proxy {
    pub fn new(destination: Destination, options: ProxyOptions, events: EventSink) -> Self {
        Self {
            destination,
            options,
            events,
        }
    }

    /// Destination for logs: the URL, or `<resolver>`.
    pub fn describe(&self) -> String {
        self.destination.to_string()
    }

    pub fn resolve(&self, headers: HeaderBlock, captures: &Captures) -> Result<Upstream, ProxyError> {
        self.destination.resolve(headers, captures, &self.options)
    }

    /// Record one failed exchange.
    fn report(&self, kind: &'static str, method: &str, path: &str, err: &ProxyError) {
        metrics::record_proxy_error(kind);
        self.events.emit(RouterEvent {
            method: method.to_string(),
            path: path.to_string(),
            source: EventSource::Proxy,
            target: self.describe(),
            error: err.to_string(),
        });
    }
}
