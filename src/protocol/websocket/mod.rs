//! WebSocket protocol engine (RFC 6455).
//!
//! # Data Flow
//! ```text
//! Upgrade request + raw socket
//!     → handshake.rs (key check, accept token, 101 response)
//!     → engine.rs (session id, session table, on_session callback)
//!     → session.rs (read loop, ping/close handling, events)
//!         → assembler.rs (partial reads, fragmentation)
//!             → frame.rs (header codec, masking)
//! ```

pub mod assembler;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod session;

pub use assembler::{AssemblerState, FrameAssembler, Message};
pub use engine::WebSocket;
pub use error::{WebSocketError, WebSocketResult};
pub use frame::{close_code, OpCode};
pub use session::{Session, SessionEvent, SessionSender};
