//! Decoder for `Transfer-Encoding: chunked` bodies (RFC 9112 section 7.1).
//!
//! Each chunk is a hex size line (optionally with extensions), the chunk data
//! and a CRLF. A zero sized chunk, optional trailer fields and a final CRLF end
//! the body. Extensions and trailers are validated for shape and discarded.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

use ChunkedState::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

/// Outcome of one state machine step.
enum Step {
    /// Not enough bytes buffered to move on.
    Pending,
    Next(ChunkedState),
    Data(Bytes, ChunkedState),
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Yields every piece of chunk data as soon as it is buffered, so a single
    /// chunk can be split over several `Chunk` items. `Eof` follows the final
    /// CRLF.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            match self.step(src)? {
                Step::Pending => return Ok(None),
                Step::Next(state) => self.state = state,
                Step::Data(bytes, state) => {
                    self.state = state;
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
            }
        }
    }
}

impl ChunkedDecoder {
    fn step(&mut self, src: &mut BytesMut) -> Result<Step, ParseError> {
        if self.state == Body {
            return Ok(self.read_body(src));
        }

        let byte = src.get_u8();
        let next = match (self.state, byte) {
            (Size, b) if b.is_ascii_hexdigit() => {
                self.push_size_digit(b)?;
                Size
            }
            (Size | SizeLws, b'\t' | b' ') => SizeLws,
            (Size | SizeLws, b';') => Extension,
            (Size | SizeLws | Extension, b'\r') => SizeLf,
            (Size, _) => return Err(ParseError::invalid_chunk("invalid chunk size")),
            (SizeLws, _) => return Err(ParseError::invalid_chunk("invalid chunk size linear white space")),

            // extensions are ignored up to the CRLF, but a bare LF is not accepted
            (Extension, b'\n') => return Err(ParseError::invalid_chunk("chunk extension contains newline")),
            (Extension, _) => Extension,

            (SizeLf, b'\n') if self.remaining_size == 0 => EndCr,
            (SizeLf, b'\n') => Body,
            (SizeLf, _) => return Err(ParseError::invalid_chunk("invalid chunk size LF")),

            (BodyCr, b'\r') => BodyLf,
            (BodyCr, _) => return Err(ParseError::invalid_chunk("invalid chunk body CR")),
            (BodyLf, b'\n') => Size,
            (BodyLf, _) => return Err(ParseError::invalid_chunk("invalid chunk body LF")),

            (Trailer, b'\r') => TrailerLf,
            (Trailer, _) => Trailer,
            (TrailerLf, b'\n') => EndCr,
            (TrailerLf, _) => return Err(ParseError::invalid_chunk("invalid trailer end LF")),

            (EndCr, b'\r') => EndLf,
            (EndCr, _) => Trailer,
            (EndLf, b'\n') => End,
            (EndLf, _) => return Err(ParseError::invalid_chunk("invalid chunk end LF")),

            (Body | End, _) => unreachable!("handled before reading a byte"),
        };

        Ok(Step::Next(next))
    }

    fn push_size_digit(&mut self, digit: u8) -> Result<(), ParseError> {
        let value = match digit {
            b'0'..=b'9' => digit - b'0',
            b'a'..=b'f' => digit + 10 - b'a',
            _ => digit + 10 - b'A',
        };

        self.remaining_size = self
            .remaining_size
            .checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(value)))
            .ok_or(ParseError::invalid_chunk("chunk size overflow"))?;
        Ok(())
    }

    fn read_body(&mut self, src: &mut BytesMut) -> Step {
        if src.is_empty() {
            return Step::Pending;
        }

        let remaining = usize::try_from(self.remaining_size).unwrap_or(usize::MAX);
        let read_size = remaining.min(src.len());
        self.remaining_size -= read_size as u64;

        let bytes = src.split_to(read_size).freeze();
        let next = if self.remaining_size > 0 { Body } else { BodyCr };
        Step::Data(bytes, next)
    }
}
