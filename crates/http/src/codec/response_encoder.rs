//! Streaming response encoder: a head, then payload items until `Eof`.

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a response body is still expected.
    pub fn in_body(&self) -> bool {
        self.payload_encoder.is_some()
    }

    /// Accounts for body bytes written straight to the transport, bypassing `dst`.
    pub fn skip_raw(&mut self, len: u64) -> Result<(), SendError> {
        match &mut self.payload_encoder {
            Some(encoder) => encoder.consume_raw(len),
            None => {
                error!(len, "expect response header but receive raw body bytes");
                Err(SendError::unexpected("raw body bytes without a response head"))
            }
        }
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::unexpected("response head before the previous body finished"));
                }

                // informational responses precede the real one and never carry a body
                if !head.status().is_informational() {
                    self.payload_encoder = PayloadEncoder::for_size(payload_size);
                }
                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
                    return Err(SendError::unexpected("payload item without a response head"));
                };

                let result = payload_encoder.encode(payload_item, dst);

                if payload_encoder.is_finish() {
                    self.payload_encoder.take();
                }

                result
            }
        }
    }
}
