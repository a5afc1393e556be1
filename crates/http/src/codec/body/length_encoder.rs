use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, SendError};

/// Writes body bytes verbatim, refusing to go past the declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
    eof: bool,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length, eof: false }
    }

    /// Accounts for body bytes that bypass this encoder and reach the wire
    /// directly (zero-copy regions).
    pub fn consume(&mut self, len: u64) -> Result<(), SendError> {
        if len > self.length {
            return Err(SendError::invalid_body(format!("body exceeds content-length by {} bytes", len - self.length)));
        }
        self.length -= len;
        Ok(())
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                self.consume(bytes.remaining() as u64)?;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                Ok(())
            }
            PayloadItem::Eof => {
                if self.length != 0 {
                    warn!(missing = self.length, "body finished before reaching content-length");
                    return Err(SendError::invalid_body("body shorter than content-length"));
                }
                self.eof = true;
                Ok(())
            }
        }
    }
}
