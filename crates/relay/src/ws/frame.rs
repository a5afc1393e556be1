use bytes::{BufMut, Bytes, BytesMut};

use crate::ws::FrameError;

/// Close status codes the relay sends.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// One frame, already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: OpCode, payload: Bytes) -> Self {
        Self { fin, opcode, payload }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload.into())
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload.into())
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload.into())
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload.into())
    }

    /// A close frame; `reason` is cut so the payload stays within the control frame limit.
    pub fn close(code: u16, reason: &str) -> Self {
        let reason = truncate_utf8(reason, 123);
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, payload.freeze())
    }

    pub fn is_fin(&self) -> bool {
        self.fin
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Status code of a close frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_ref()) {
            (OpCode::Close, [high, low, ..]) => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|_e| FrameError::InvalidUtf8)
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
