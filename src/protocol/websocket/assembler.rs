//! Per-session frame reassembly.
//!
//! # State Machine
//! ```text
//!              header decoded, payload short
//!   Idle ──────────────────────────────────────▶ AwaitingPayload
//!    ▲  ◀──────── payload complete, FIN ─────────┘      │
//!    │                                                  │ payload complete, !FIN
//!    │ continuation with FIN                            ▼
//!    └───────────────────────────────────────── AwaitingContinuation
//! ```
//!
//! Chunks may split frames anywhere, including inside the header. Control
//! frames are delivered as soon as they complete, even between fragments of
//! a data message.

use bytes::{Buf, Bytes, BytesMut};

use super::error::{WebSocketError, WebSocketResult};
use super::frame::{FrameHeader, OpCode, Unmasker};

/// Default ceiling for a single frame or reassembled message.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest payload buffer reserved from a header alone; the rest grows as bytes arrive.
const MAX_PAYLOAD_RESERVE: usize = 64 * 1024;

/// A complete message, tagged with the opcode of its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: OpCode,
    pub payload: Bytes,
}

/// Observable state of a [`FrameAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    AwaitingPayload,
    AwaitingContinuation,
}

/// A frame whose header has been read but whose payload is still arriving.
#[derive(Debug)]
struct PendingFrame {
    header: FrameHeader,
    len: usize,
    unmasker: Unmasker,
    payload: BytesMut,
}

impl PendingFrame {
    fn remaining(&self) -> usize {
        self.len - self.payload.len()
    }

    fn push(&mut self, chunk: &[u8]) {
        let start = self.payload.len();
        self.payload.extend_from_slice(chunk);
        self.unmasker.apply(&mut self.payload[start..]);
    }
}

/// A fragmented data message waiting for its final frame.
#[derive(Debug)]
struct PartialMessage {
    opcode: OpCode,
    payload: BytesMut,
}

/// Incremental decoder turning socket reads into complete messages.
#[derive(Debug)]
pub struct FrameAssembler {
    max_size: usize,
    buffer: BytesMut,
    frame: Option<PendingFrame>,
    message: Option<PartialMessage>,
}

impl FrameAssembler {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buffer: BytesMut::new(),
            frame: None,
            message: None,
        }
    }

    pub fn state(&self) -> AssemblerState {
        if self.frame.is_some() {
            AssemblerState::AwaitingPayload
        } else if self.message.is_some() {
            AssemblerState::AwaitingContinuation
        } else {
            AssemblerState::Idle
        }
    }

    /// Feed bytes in transport order, appending every message they complete
    /// to `messages`.
    ///
    /// Messages completed before an error stay in `messages` so the caller
    /// can deliver them ahead of failing the session.
    pub fn feed(&mut self, data: &[u8], messages: &mut Vec<Message>) -> WebSocketResult<()> {
        self.buffer.extend_from_slice(data);

        loop {
            if let Some(frame) = self.frame.as_mut() {
                let take = frame.remaining().min(self.buffer.len());
                if take > 0 {
                    let chunk = self.buffer.split_to(take);
                    frame.push(&chunk);
                }
                if frame.remaining() > 0 {
                    break;
                }
                if let Some(frame) = self.frame.take() {
                    self.complete(frame.header, frame.payload.freeze(), messages)?;
                }
                continue;
            }

            let Some((header, header_len)) = FrameHeader::decode(&self.buffer)? else {
                break;
            };
            if header.payload_len > self.max_size as u64 {
                return Err(WebSocketError::FrameTooLarge {
                    len: header.payload_len,
                    max: self.max_size,
                });
            }

            self.buffer.advance(header_len);
            let len = header.payload_len as usize;
            self.frame = Some(PendingFrame {
                header,
                len,
                unmasker: Unmasker::new(header.mask),
                payload: BytesMut::with_capacity(len.min(MAX_PAYLOAD_RESERVE)),
            });
        }

        Ok(())
    }

    fn complete(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        messages: &mut Vec<Message>,
    ) -> WebSocketResult<()> {
        match header.opcode {
            opcode if opcode.is_control() => {
                messages.push(Message { opcode, payload });
            }
            OpCode::Continuation => {
                let Some(message) = self.message.as_mut() else {
                    tracing::debug!(len = payload.len(), "Discarding continuation frame without a pending message");
                    return Ok(());
                };
                let total = message.payload.len() + payload.len();
                if total > self.max_size {
                    self.message = None;
                    return Err(WebSocketError::FrameTooLarge {
                        len: total as u64,
                        max: self.max_size,
                    });
                }
                message.payload.extend_from_slice(&payload);

                if header.fin {
                    if let Some(message) = self.message.take() {
                        messages.push(Message {
                            opcode: message.opcode,
                            payload: message.payload.freeze(),
                        });
                    }
                }
            }
            opcode => {
                if let Some(stale) = self.message.take() {
                    tracing::warn!(
                        discarded = stale.payload.len(),
                        "New data frame before fragmented message completed"
                    );
                }
                if header.fin {
                    messages.push(Message { opcode, payload });
                } else {
                    self.message = Some(PartialMessage {
                        opcode,
                        payload: BytesMut::from(&payload[..]),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
