//! RFC 6455 frame header codec and payload masking.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                  Masking-key (if MASK set)                    |
//! +---------------------------------------------------------------+
//! ```
//!
//! Extended lengths are big-endian. Server frames are never masked.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{WebSocketError, WebSocketResult};

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any opcode without a defined meaning (3-7, 11-15).
    Reserved(u8),
}

impl OpCode {
    /// Control frames have the high bit of the opcode set.
    pub fn is_control(&self) -> bool {
        u8::from(*self) & 0x08 != 0
    }
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value & 0x0f {
            0 => Self::Continuation,
            1 => Self::Text,
            2 => Self::Binary,
            8 => Self::Close,
            9 => Self::Ping,
            10 => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Continuation => 0,
            OpCode::Text => 1,
            OpCode::Binary => 2,
            OpCode::Close => 8,
            OpCode::Ping => 9,
            OpCode::Pong => 10,
            OpCode::Reserved(code) => code & 0x0f,
        }
    }
}

/// Close status codes used by this crate.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1-3 bits, carried but not interpreted.
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// A final, unmasked frame header as sent by a server.
    pub fn server(opcode: OpCode, payload_len: usize) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            mask: None,
            payload_len: payload_len as u64,
        }
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns the header and its encoded size, or `None` when `buf` does not
    /// yet hold the whole header.
    pub fn decode(buf: &[u8]) -> WebSocketResult<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let rsv = (buf[0] >> 4) & 0x07;
        let opcode = OpCode::from(buf[0]);
        let masked = buf[1] & 0x80 != 0;

        let (payload_len, mut cursor) = match buf[1] & 0x7f {
            126 => {
                let Some(ext) = buf.get(2..4) else {
                    return Ok(None);
                };
                (u16::from_be_bytes([ext[0], ext[1]]) as u64, 4)
            }
            127 => {
                let Some(ext) = buf.get(2..10) else {
                    return Ok(None);
                };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(ext);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(WebSocketError::InvalidLength(len));
                }
                (len, 10)
            }
            len => (len as u64, 2),
        };

        let mask = if masked {
            let Some(key) = buf.get(cursor..cursor + 4) else {
                return Ok(None);
            };
            cursor += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        Ok(Some((
            Self {
                fin,
                rsv,
                opcode,
                mask,
                payload_len,
            },
            cursor,
        )))
    }

    /// Append the encoded header to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut first = u8::from(self.opcode) | (self.rsv & 0x07) << 4;
        if self.fin {
            first |= 0x80;
        }
        out.put_u8(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        match self.payload_len {
            len @ 0..=125 => out.put_u8(mask_bit | len as u8),
            len @ 126..=0xffff => {
                out.put_u8(mask_bit | 126);
                out.put_u16(len as u16);
            }
            len => {
                out.put_u8(mask_bit | 127);
                out.put_u64(len);
            }
        }

        if let Some(key) = self.mask {
            out.put_slice(&key);
        }
    }
}

/// XOR `data` with `key`, treating `data[0]` as payload byte `offset`.
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}

/// Resumable unmasking across partial reads of one frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unmasker {
    key: Option<[u8; 4]>,
    offset: usize,
}

impl Unmasker {
    pub fn new(key: Option<[u8; 4]>) -> Self {
        Self { key, offset: 0 }
    }

    /// Unmask the next chunk of payload in place.
    pub fn apply(&mut self, chunk: &mut [u8]) {
        if let Some(key) = self.key {
            apply_mask(chunk, key, self.offset);
        }
        self.offset += chunk.len();
    }

    /// Payload bytes processed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Encode a final, unmasked server frame.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 10);
    FrameHeader::server(opcode, payload.len()).encode(&mut out);
    out.put_slice(payload);
    out.freeze()
}

/// Encode a close frame; the status code, when given, precedes the reason.
///
/// A reason without a code is sent with [`close_code::NORMAL`].
pub fn encode_close(code: Option<u16>, reason: &str) -> Bytes {
    let mut payload = BytesMut::with_capacity(reason.len() + 2);
    if code.is_some() || !reason.is_empty() {
        payload.put_u16(code.unwrap_or(close_code::NORMAL));
        payload.put_slice(reason.as_bytes());
    }
    encode_frame(OpCode::Close, &payload)
}

/// Split a close payload into status code and reason.
pub fn decode_close(payload: &[u8]) -> (Option<u16>, String) {
    match payload {
        [hi, lo, reason @ ..] => (
            Some(u16::from_be_bytes([*hi, *lo])),
            String::from_utf8_lossy(reason).into_owned(),
        ),
        _ => (None, String::new()),
    }
}
