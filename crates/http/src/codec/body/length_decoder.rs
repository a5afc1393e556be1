//! Decoder for bodies framed by `Content-Length`.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Hands out body bytes until exactly `length` of them have been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// bytes of the body still to come
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.length, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.length -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_declared_length() {
        let mut buffer = BytesMut::from(&b"101234567890abcdef\r\n\r\n"[..]);
        let mut length_decoder = LengthDecoder::new(10);

        let payload = length_decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&payload.as_bytes().unwrap()[..], b"1012345678");
        assert_eq!(&buffer[..], b"90abcdef\r\n\r\n");

        assert!(length_decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn split_body_arrives_in_pieces() {
        let mut buffer = BytesMut::from(&b"abc"[..]);
        let mut length_decoder = LengthDecoder::new(5);

        assert_eq!(length_decoder.decode(&mut buffer).unwrap().unwrap().len(), 3);
        assert!(length_decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"de");
        assert_eq!(length_decoder.decode(&mut buffer).unwrap().unwrap().len(), 2);
        assert!(length_decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
