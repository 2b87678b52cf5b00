//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP/2 stream (method, path)
//!     → router.rs (proxies first, then per-method routes)
//!     → resolver.rs (ordered regex table, captures)
//!     → Return: Response or None
//!
//! Sniffed upgrade (request head, raw socket)
//!     → router.rs (proxies first, then protocols)
//!     → Return: Handled or Unhandled(request, socket)
//!
//! Failures
//!     → events.rs (tracing + broadcast channel)
//! ```
//!
//! # Design Decisions
//! - Tables are compiled at startup and immutable at runtime
//! - Patterns are full-path anchored regular expressions
//! - First registered match wins
//! - The query string never takes part in matching

pub mod events;
pub mod resolver;
pub mod router;

pub use events::{EventSink, EventSource, RouterEvent};
pub use resolver::{Captures, PatternResolver, RouteError, RouteMatch};
pub use router::{Handler, Router, RouterBuilder, UpgradeOutcome};
