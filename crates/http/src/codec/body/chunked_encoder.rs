use bytes::{Buf, BufMut, BytesMut};
use std::io::Write;
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadItem, SendError};

/// Frames each payload item as one chunk and writes the terminating zero chunk on `Eof`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl Default for ChunkedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Err(SendError::unexpected("chunk after the terminating chunk"));
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                // an empty chunk would read as the terminator
                if !bytes.has_remaining() {
                    return Ok(());
                }
                write!(dst.writer(), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                dst.put(bytes);
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}
