//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, detection, hyper HTTP/2 server)
//!     → tower layers (request id, trace, default server header)
//!     → routing::Router (handlers, proxies, static files)
//!     → response.rs (gateway-generated responses)
//!     → Send to client
//!
//! Upgrade requests bypass the HTTP/2 server and reach the router's
//! upgrade table with the raw socket.
//! ```

pub mod response;
pub mod server;
pub mod static_files;

pub use server::{GatewayServer, ServeError};
pub use static_files::StaticFiles;
