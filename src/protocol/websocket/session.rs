//! One live WebSocket connection.
//!
//! # Responsibilities
//! - Read the socket and feed the frame assembler
//! - Answer pings and close frames
//! - Deliver typed events to the application
//! - Serialize outbound frames through a shared writer
//!
//! # Design Decisions
//! - Events flow over an unbounded channel owned by [`Session`]; dropping
//!   the session discards events but the connection keeps running
//! - [`SessionSender`] is cloneable so the engine can broadcast while the
//!   application holds its own handle

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};

use super::assembler::{FrameAssembler, Message};
use super::error::{WebSocketError, WebSocketResult};
use super::frame::{close_code, decode_close, encode_close, encode_frame, OpCode};
use crate::net::rewind::RawSocket;
use crate::net::sniff::UpgradeRequest;
use crate::routing::Captures;

const READ_CHUNK: usize = 8 * 1024;

/// Events delivered to the application for one session.
#[derive(Debug)]
pub enum SessionEvent {
    Text(String),
    Binary(Bytes),
    /// Already answered with a pong.
    Ping(Bytes),
    Pong(Bytes),
    /// The peer started the closing handshake.
    Close { code: Option<u16>, reason: String },
    /// A frame with an opcode this engine does not interpret.
    Unknown { opcode: u8, payload: Bytes },
    Error(WebSocketError),
}

/// Cloneable write handle for a session.
#[derive(Clone)]
pub struct SessionSender {
    id: u64,
    writer: Arc<Mutex<WriteHalf<RawSocket>>>,
    closed: Arc<AtomicBool>,
}

impl SessionSender {
    pub(crate) fn new(id: u64, writer: WriteHalf<RawSocket>) -> Self {
        Self {
            id,
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn text(&self, text: &str) -> WebSocketResult<()> {
        self.send_frame(encode_frame(OpCode::Text, text.as_bytes())).await
    }

    pub async fn binary(&self, data: &[u8]) -> WebSocketResult<()> {
        self.send_frame(encode_frame(OpCode::Binary, data)).await
    }

    pub async fn ping(&self, payload: &[u8]) -> WebSocketResult<()> {
        self.send_frame(encode_frame(OpCode::Ping, payload)).await
    }

    pub async fn pong(&self, payload: &[u8]) -> WebSocketResult<()> {
        self.send_frame(encode_frame(OpCode::Pong, payload)).await
    }

    /// Send a close frame and shut the socket's write side down.
    pub async fn close(&self, code: Option<u16>, reason: &str) -> WebSocketResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(WebSocketError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&encode_close(code, reason)).await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Write an already encoded frame.
    pub async fn send_frame(&self, frame: Bytes) -> WebSocketResult<()> {
        if self.is_closed() {
            return Err(WebSocketError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Application handle for one upgraded connection.
pub struct Session {
    id: u64,
    request: UpgradeRequest,
    captures: Captures,
    sender: SessionSender,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    pub(crate) fn new(
        request: UpgradeRequest,
        captures: Captures,
        sender: SessionSender,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            id: sender.id(),
            request,
            captures,
            sender,
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The upgrade request that opened this session.
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// Captures of the upgrade route that matched.
    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    /// Next event, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub async fn text(&self, text: &str) -> WebSocketResult<()> {
        self.sender.text(text).await
    }

    pub async fn binary(&self, data: &[u8]) -> WebSocketResult<()> {
        self.sender.binary(data).await
    }

    pub async fn close(&self, code: Option<u16>, reason: &str) -> WebSocketResult<()> {
        self.sender.close(code, reason).await
    }
}

impl std::fmt::Debug for SessionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSender")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.request.path)
            .finish_non_exhaustive()
    }
}

/// Drive the read side of a session until the socket or the protocol closes it.
pub(crate) async fn run(
    mut reader: ReadHalf<RawSocket>,
    sender: SessionSender,
    events: mpsc::UnboundedSender<SessionEvent>,
    max_frame_size: usize,
) {
    let mut assembler = FrameAssembler::new(max_frame_size);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(session_id = sender.id(), error = %e, "WebSocket read failed");
                let _ = events.send(SessionEvent::Error(e.into()));
                break;
            }
        };

        let mut messages = Vec::new();
        let fed = assembler.feed(&buf[..n], &mut messages);

        for message in messages {
            if !dispatch(message, &sender, &events).await {
                return;
            }
        }

        if let Err(e) = fed {
            tracing::warn!(session_id = sender.id(), error = %e, "Failing WebSocket session");
            let code = match e {
                WebSocketError::FrameTooLarge { .. } => close_code::MESSAGE_TOO_BIG,
                _ => close_code::PROTOCOL_ERROR,
            };
            let _ = sender.close(Some(code), "").await;
            let _ = events.send(SessionEvent::Error(e));
            break;
        }
    }
}

/// Deliver one message; returns false once the session is closing.
async fn dispatch(
    message: Message,
    sender: &SessionSender,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    let event = match message.opcode {
        OpCode::Text => match String::from_utf8(message.payload.to_vec()) {
            Ok(text) => SessionEvent::Text(text),
            Err(_) => SessionEvent::Error(WebSocketError::InvalidUtf8),
        },
        OpCode::Binary => SessionEvent::Binary(message.payload),
        OpCode::Ping => {
            if let Err(e) = sender.pong(&message.payload).await {
                tracing::debug!(session_id = sender.id(), error = %e, "Pong failed");
            }
            SessionEvent::Ping(message.payload)
        }
        OpCode::Pong => SessionEvent::Pong(message.payload),
        OpCode::Close => {
            let (code, reason) = decode_close(&message.payload);
            tracing::debug!(session_id = sender.id(), ?code, %reason, "Peer closed WebSocket");
            let _ = events.send(SessionEvent::Close { code, reason });
            if let Err(e) = sender.close(Some(close_code::GOING_AWAY), "").await {
                tracing::debug!(session_id = sender.id(), error = %e, "Close reply failed");
            }
            return false;
        }
        opcode => SessionEvent::Unknown {
            opcode: opcode.into(),
            payload: message.payload,
        },
    };

    let _ = events.send(event);
    true
}
