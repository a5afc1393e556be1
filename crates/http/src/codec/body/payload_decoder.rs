//! Body decoder selected from the request's framing.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// One request body, read with the strategy its head announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    /// Yields `Eof` straight away.
    NoBody,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(0) | PayloadSize::Empty => Self::NoBody,
            PayloadSize::Length(length) => Self::Length(LengthDecoder::new(length)),
            PayloadSize::Chunked => Self::Chunked(ChunkedDecoder::new()),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Length(decoder) => decoder.decode(src),
            Self::Chunked(decoder) => decoder.decode(src),
            Self::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
