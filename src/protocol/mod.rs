//! Pluggable protocol engines for upgraded connections.
//!
//! # Data Flow
//! ```text
//! Raw socket with sniffed upgrade request
//!     → routing (upgrade table, first match)
//!     → Protocol::upgrade (handshake, validation)
//!     → engine-specific session lifetime on the raw socket
//! ```
//!
//! # Design Decisions
//! - Engines are shared as `Arc<dyn Protocol>` for the whole process lifetime
//! - A request that is not for the engine is ignored, never an error
//! - The returned future owns the connection until it closes

pub mod websocket;

use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::net::rewind::RawSocket;
use crate::net::sniff::UpgradeRequest;
use crate::routing::Captures;

/// A capability that takes over raw sockets after a protocol upgrade.
pub trait Protocol: Send + Sync + 'static {
    /// Engine name used in logs and events.
    fn name(&self) -> &str;

    /// Run the handshake and, when it succeeds, the connection.
    fn upgrade(
        self: Arc<Self>,
        request: UpgradeRequest,
        socket: RawSocket,
        captures: Captures,
    ) -> BoxFuture<'static, ()>;
}

pub use websocket::WebSocket;
