//! WebSocket error types.

use thiserror::Error;

/// Errors raised by the WebSocket codec and sessions.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// A frame declared a payload larger than the configured limit.
    #[error("frame payload of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: usize },

    /// A 64-bit length with the most significant bit set.
    #[error("invalid 64-bit payload length {0:#x}")]
    InvalidLength(u64),

    /// A text message that is not valid UTF-8.
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    /// The session was already closed.
    #[error("session closed")]
    Closed,

    /// Socket I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for WebSocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;
