//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, ALPN h2 / http/1.1)
//!     → connection.rs (id, lifetime tracking)
//!     → detect.rs (HTTP/2 preface or sniffed upgrade)
//!         → sniff.rs (request head parsing)
//!         → rewind.rs (replay of read-ahead bytes)
//!     → Hand off to HTTP/2 server or upgrade dispatch
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod detect;
pub mod listener;
pub mod rewind;
pub mod sniff;
pub mod tls;
