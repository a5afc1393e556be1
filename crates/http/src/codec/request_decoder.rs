//! Streaming request decoder.
//!
//! Yields a [`Message::Header`] once a request head is complete, then the body
//! as [`Message::Payload`] items ending with [`PayloadItem::Eof`]. Requests
//! without a body still produce the `Eof` item so every request is terminated
//! the same way.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Two phase decoder: head first, then the body with the framing the head chose.
///
/// `payload_decoder` is `None` while a head is being parsed.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the decoder is between two requests.
    pub fn is_idle(&self) -> bool {
        self.payload_decoder.is_none()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn pipelined_requests() {
        let str = indoc! {r##"
        POST /a HTTP/1.1
        Content-Length: 2

        okGET /b HTTP/1.1
        Host: localhost

        "##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((header, payload_size))) = decoder.decode(&mut buf).unwrap() else { panic!("expect header") };
        assert_eq!(header.path(), "/a");
        assert_eq!(payload_size, PayloadSize::Length(2));
        assert!(!decoder.is_idle());

        let chunk = decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().as_ref(), b"ok");
        assert!(decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap().is_eof());
        assert!(decoder.is_idle());

        let Some(Message::Header((header, _))) = decoder.decode(&mut buf).unwrap() else { panic!("expect header") };
        assert_eq!(header.path(), "/b");
        assert!(decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap().is_eof());
        assert!(buf.is_empty());
    }
}
