//! Edge gateway library.
//!
//! A single listener that multiplexes HTTP/2 streams and sniffed HTTP/1.x
//! upgrade requests onto local handlers, reverse proxies, static
//! directories and upgrade protocols such as WebSocket.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod proxy;
pub mod routing;

pub use config::GatewayConfig;
pub use http::{GatewayServer, ServeError, StaticFiles};
pub use lifecycle::Shutdown;
pub use protocol::{Protocol, WebSocket};
pub use proxy::{Destination, ProxyOptions, Target};
pub use routing::{Captures, Router, RouterBuilder, RouterEvent};
