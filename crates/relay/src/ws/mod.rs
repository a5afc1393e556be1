//! The WebSocket subset the relay speaks (RFC 6455).
//!
//! - [`Frame`] and [`OpCode`]: one unit of the framed protocol
//! - [`FrameDecoder`] / [`FrameEncoder`]: `tokio_util` codecs for frames
//! - [`handshake`]: validating the upgrade request and building the `101` response

mod codec;
mod frame;
pub mod handshake;

pub use codec::{FrameDecoder, FrameEncoder};
pub use frame::{Frame, OpCode, close_code};

use std::io;
use thiserror::Error;

/// Malformed or oversize frames.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("client frame is not masked")]
    Unmasked,

    #[error("reserved bits set: {0:#x}")]
    ReservedBits(u8),

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(u64),

    #[error("control frame is fragmented")]
    FragmentedControl,

    #[error("frame payload of {size} bytes exceeds the limit {max_size}")]
    TooLarge { size: u64, max_size: u64 },

    #[error("text payload is not valid utf-8")]
    InvalidUtf8,

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("data frame while a fragmented message is in progress")]
    ExpectedContinuation,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl FrameError {
    /// The close code sent to the peer before the connection is dropped.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge { .. } => close_code::MESSAGE_TOO_BIG,
            FrameError::InvalidUtf8 => close_code::INVALID_PAYLOAD,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}
