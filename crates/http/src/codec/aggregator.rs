//! Collects a streamed request into one [`FullRequest`].
//!
//! Nothing is handed out until the head and the whole body (or the chunked
//! terminator) are buffered, whatever way the bytes were split on arrival.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::RequestDecoder;
use crate::ensure;
use crate::protocol::{FullRequest, Message, ParseError, PayloadItem, RequestHeader};

/// Output of [`RequestAggregator`].
#[derive(Debug)]
pub enum Aggregated {
    /// The client sent `Expect: 100-continue` and its body has not arrived yet;
    /// an interim `100 Continue` should go out now.
    Continue,
    Request(FullRequest),
}

/// A [`RequestDecoder`] that buffers bodies up to `max_body_size` bytes.
#[derive(Debug)]
pub struct RequestAggregator {
    decoder: RequestDecoder,
    max_body_size: u64,
    pending: Option<(RequestHeader, BytesMut)>,
}

impl RequestAggregator {
    pub fn new(max_body_size: u64) -> Self {
        Self { decoder: RequestDecoder::new(), max_body_size, pending: None }
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    /// Whether part of a request has been consumed but not yet handed out.
    pub fn is_partial(&self) -> bool {
        self.pending.is_some()
    }
}

impl Decoder for RequestAggregator {
    type Item = Aggregated;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(message) = self.decoder.decode(src)? else {
                return Ok(None);
            };

            match message {
                Message::Header((mut header, payload_size)) => {
                    if let Some(length) = payload_size.declared_length() {
                        ensure!(length <= self.max_body_size, ParseError::too_large_body(length, self.max_body_size));
                    }

                    let body = match payload_size.declared_length() {
                        Some(length) => BytesMut::with_capacity(usize::try_from(length).unwrap_or(0)),
                        None => BytesMut::new(),
                    };

                    let send_continue = !payload_size.is_empty() && header.take_expect_continue();
                    self.pending = Some((header, body));

                    if send_continue {
                        trace!("request expects 100-continue");
                        return Ok(Some(Aggregated::Continue));
                    }
                }

                Message::Payload(PayloadItem::Chunk(bytes)) => {
                    let (_, body) = self.pending.as_mut().ok_or_else(|| ParseError::invalid_body("body without a request head"))?;
                    let current_size = (body.len() + bytes.len()) as u64;
                    ensure!(current_size <= self.max_body_size, ParseError::too_large_body(current_size, self.max_body_size));
                    body.extend_from_slice(&bytes);
                }

                Message::Payload(PayloadItem::Eof) => {
                    let (header, body) = self.pending.take().ok_or_else(|| ParseError::invalid_body("body without a request head"))?;
                    trace!(path = header.path(), body_size = body.len(), "aggregated request");
                    return Ok(Some(Aggregated::Request(FullRequest::new(header, body.freeze()))));
                }
            }
        }
    }
}
