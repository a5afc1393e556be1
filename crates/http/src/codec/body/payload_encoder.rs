//! Body encoder selected from the response's framing.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// One response body, written with the framing its head announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
}

impl PayloadEncoder {
    /// `None` for an empty body, which needs no encoder at all.
    pub fn for_size(payload_size: PayloadSize) -> Option<Self> {
        match payload_size {
            PayloadSize::Length(size) => Some(Self::Length(LengthEncoder::new(size))),
            PayloadSize::Chunked => Some(Self::Chunked(ChunkedEncoder::new())),
            PayloadSize::Empty => None,
        }
    }

    pub fn is_finish(&self) -> bool {
        match self {
            Self::Length(encoder) => encoder.is_finish(),
            Self::Chunked(encoder) => encoder.is_finish(),
        }
    }

    /// Accounts for `len` body bytes the caller writes around the encoder.
    ///
    /// A chunked body needs every byte framed, so only length framing allows it.
    pub fn consume_raw(&mut self, len: u64) -> Result<(), SendError> {
        match self {
            Self::Length(encoder) => encoder.consume(len),
            Self::Chunked(_) => Err(SendError::unexpected("raw region written into a chunked body")),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::Length(encoder) => encoder.encode(item, dst),
            Self::Chunked(encoder) => encoder.encode(item, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn raw_bytes_only_count_against_a_length() {
        let mut length = PayloadEncoder::for_size(PayloadSize::Length(4)).unwrap();
        length.consume_raw(4).unwrap();
        assert!(length.consume_raw(1).is_err());
        length.encode(PayloadItem::<Bytes>::Eof, &mut BytesMut::new()).unwrap();
        assert!(length.is_finish());

        let mut chunked = PayloadEncoder::for_size(PayloadSize::Chunked).unwrap();
        assert!(chunked.consume_raw(1).is_err());
    }

    #[test]
    fn empty_body_has_no_encoder() {
        assert!(PayloadEncoder::for_size(PayloadSize::Empty).is_none());
    }

    #[test]
    fn chunked_body_is_framed() {
        let mut encoder = PayloadEncoder::for_size(PayloadSize::Chunked).unwrap();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hi")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert_eq!(&dst[..], b"2\r\nhi\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
    }
}
