//! Frame codecs.
//!
//! The server side decodes masked client frames and encodes unmasked ones. The
//! opposite pair ([`FrameDecoder::unmasked`], [`FrameEncoder::masked`]) speaks
//! for a client and is what the tests and benchmarks drive the relay with.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::ws::{Frame, FrameError, OpCode};

const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: u64,
    require_mask: bool,
}

impl FrameDecoder {
    /// Decoder for client frames, which must be masked.
    pub fn new(max_frame_size: u64) -> Self {
        Self { max_frame_size, require_mask: true }
    }

    /// Decoder for server frames, which are not masked.
    pub fn unmasked(max_frame_size: u64) -> Self {
        Self { max_frame_size, require_mask: false }
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let (b0, b1) = (src[0], src[1]);
        if b0 & 0x70 != 0 {
            return Err(FrameError::ReservedBits(b0 & 0x70));
        }

        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::try_from(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;
        if self.require_mask && !masked {
            return Err(FrameError::Unmasked);
        }

        let (len, mut header_len) = match b1 & 0x7F {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut len = [0u8; 8];
                len.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            len => (u64::from(len), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControl);
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlTooLong(len));
            }
        }

        // checked before the payload arrives so an oversize frame is never buffered
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge { size: len, max_size: self.max_frame_size });
        }

        if masked {
            header_len += 4;
        }

        let payload_len = usize::try_from(len).map_err(|_e| FrameError::TooLarge { size: len, max_size: self.max_frame_size })?;
        let total = header_len + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut header = src.split_to(total);
        let mut payload = header.split_off(header_len);
        if masked {
            let key = [header[header_len - 4], header[header_len - 3], header[header_len - 2], header[header_len - 1]];
            apply_mask(&mut payload, key);
        }

        trace!(?opcode, fin, len, "decoded frame");
        Ok(Some(Frame::new(fin, opcode, payload.freeze())))
    }
}

/// Encodes frames; unmasked unless built with [`FrameEncoder::masked`].
#[derive(Debug, Clone, Default)]
pub struct FrameEncoder {
    mask: Option<[u8; 4]>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self { mask: None }
    }

    pub fn masked(key: [u8; 4]) -> Self {
        Self { mask: Some(key) }
    }
}

impl Encoder<Frame> for FrameEncoder {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let fin_bit = if frame.is_fin() { 0x80 } else { 0 };
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let payload = frame.payload();
        let len = payload.len();

        dst.reserve(14 + len);
        dst.put_u8(fin_bit | frame.opcode() as u8);
        match u16::try_from(len) {
            Ok(short) if short < 126 => dst.put_u8(mask_bit | short as u8),
            Ok(medium) => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(medium);
            }
            Err(_) => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match self.mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(payload),
        }
        Ok(())
    }
}

fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
