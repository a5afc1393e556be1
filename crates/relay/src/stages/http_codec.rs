//! The server side HTTP/1.1 codec stage.
//!
//! Inbound, raw bytes are cumulated until the [`RequestAggregator`] yields a
//! complete request, which is passed on with its body wrapped in a [`Buffer`].
//! Outbound, response heads and payload items are encoded into bytes; regions
//! pass through untouched but still count against the declared body length.
//!
//! After a request that asks to switch protocols the stage stops decoding: the
//! bytes behind it may already belong to the new protocol. If the switch goes
//! ahead the stage is replaced and hands those bytes to its replacement;
//! otherwise decoding resumes once the response has been flushed.

use bytes::BytesMut;
use http::header::CONNECTION;
use http::{HeaderValue, Response, StatusCode};
use relay_http::codec::{Aggregated, RequestAggregator, ResponseEncoder};
use relay_http::protocol::{Message, ParseError, PayloadSize, ResponseHead};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::error::RelayError;
use crate::pipeline::{Inbound, LifecycleEvent, Outbound, Stage, StageContext};

const CLOSE: HeaderValue = HeaderValue::from_static("close");

#[derive(Debug)]
pub struct HttpCodecStage {
    cumulation: BytesMut,
    decoder: RequestAggregator,
    encoder: ResponseEncoder,
    paused: bool,
    resume_after_flush: bool,
}

impl HttpCodecStage {
    pub fn new(max_request_size: u64) -> Self {
        Self {
            cumulation: BytesMut::new(),
            decoder: RequestAggregator::new(max_request_size),
            encoder: ResponseEncoder::new(),
            paused: false,
            resume_after_flush: false,
        }
    }

    fn decode_available(&mut self, ctx: &mut StageContext<'_>) -> Result<(), RelayError> {
        while !self.paused {
            match self.decoder.decode(&mut self.cumulation) {
                Ok(Some(Aggregated::Continue)) => {
                    self.encode(ctx, Message::Header((status_only(StatusCode::CONTINUE), PayloadSize::Empty)))?;
                    ctx.flush();
                }
                Ok(Some(Aggregated::Request(request))) => {
                    if request.header().is_upgrade() {
                        trace!(conn = %ctx.connection().id(), "upgrade requested, holding back further input");
                        self.paused = true;
                    }
                    ctx.fire_read(Inbound::Request(request.map_body(Buffer::wrap)));
                }
                Ok(None) => break,
                Err(e) => return Err(self.reject(ctx, e)),
            }
        }
        Ok(())
    }

    /// Answers a request that could not be decoded and closes the connection.
    fn reject(&mut self, ctx: &mut StageContext<'_>, e: ParseError) -> RelayError {
        let status = if e.is_too_large() { StatusCode::PAYLOAD_TOO_LARGE } else { StatusCode::BAD_REQUEST };
        warn!(conn = %ctx.connection().id(), cause = %e, status = status.as_u16(), "rejecting request");

        self.paused = true;
        self.cumulation.clear();

        let mut head = Response::new(());
        *head.status_mut() = status;
        head.headers_mut().insert(CONNECTION, CLOSE);

        // a response already under way can't be interrupted by another head
        if !self.encoder.in_body() && self.encode(ctx, Message::Header((head, PayloadSize::Empty))).is_ok() {
            ctx.flush();
        }
        ctx.close();

        RelayError::from(e)
    }

    fn encode(&mut self, ctx: &mut StageContext<'_>, item: Message<(ResponseHead, PayloadSize)>) -> Result<(), RelayError> {
        let mut dst = BytesMut::new();
        self.encoder.encode(item, &mut dst)?;
        if !dst.is_empty() {
            ctx.write(Outbound::Bytes(Buffer::wrap(dst.freeze())));
        }
        Ok(())
    }
}

impl Stage for HttpCodecStage {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        match msg {
            Inbound::Bytes(mut buffer) => {
                buffer.read_into(&mut self.cumulation)?;
                self.decode_available(ctx)
            }
            msg => {
                ctx.fire_read(msg);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, ctx: &mut StageContext<'_>, event: LifecycleEvent) -> Result<(), RelayError> {
        let resume = matches!(event, LifecycleEvent::WriteComplete(_)) && self.resume_after_flush && !self.encoder.in_body();
        ctx.fire_event(event);

        if resume {
            debug!(conn = %ctx.connection().id(), "protocol switch declined, resuming request decoding");
            self.paused = false;
            self.resume_after_flush = false;
            self.decode_available(ctx)?;
        }
        Ok(())
    }

    fn handle_write(&mut self, ctx: &mut StageContext<'_>, msg: Outbound) -> Result<(), RelayError> {
        match msg {
            Outbound::Response(head, payload_size) => {
                let status = head.status();
                if self.paused && !status.is_informational() {
                    self.resume_after_flush = true;
                }
                self.encode(ctx, Message::Header((head, payload_size)))
            }
            Outbound::Payload(item) => self.encode(ctx, Message::Payload(item)),
            Outbound::Region(bytes) => {
                self.encoder.skip_raw(bytes.len() as u64)?;
                ctx.write(Outbound::Region(bytes));
                Ok(())
            }
            msg => {
                ctx.write(msg);
                Ok(())
            }
        }
    }

    fn on_removed(&mut self) -> Option<Inbound> {
        if self.cumulation.is_empty() {
            return None;
        }
        trace!(len = self.cumulation.len(), "handing over buffered bytes");
        Some(Inbound::Bytes(Buffer::wrap(self.cumulation.split().freeze())))
    }
}

fn status_only(status: StatusCode) -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = status;
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{Log, Recorder, RecordingTransport, test_pipeline};
    use crate::pipeline::{Pipeline, Position};
    use bytes::Bytes;
    use indoc::indoc;
    use relay_http::protocol::PayloadItem;

    fn pipeline(log: &Log) -> Pipeline<RecordingTransport> {
        let mut pipeline = test_pipeline();
        pipeline.add_last("http-codec", HttpCodecStage::new(1024)).unwrap();
        pipeline.add_last("recorder", Recorder::new("app", log)).unwrap();
        pipeline
    }

    fn feed(pipeline: &mut Pipeline<RecordingTransport>, input: &str) {
        let input = input.replace('\n', "\r\n");
        pipeline.fire_read(Inbound::Bytes(Buffer::copy_from_slice(input.as_bytes())));
    }

    #[test]
    fn fragmented_request_is_delivered_once() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /index");
        feed(&mut pipeline, ".html HTTP/1.1\nHost: local");
        assert!(log.entries().is_empty());
        feed(&mut pipeline, "host\n\n");

        assert_eq!(log.entries(), ["app:read:/index.html"]);
    }

    #[test]
    fn pipelined_requests_are_delivered_in_order() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /a HTTP/1.1\nHost: x\n\nGET /b HTTP/1.1\nHost: x\n\n");

        assert_eq!(log.entries(), ["app:read:/a", "app:read:/b"]);
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET / HTTP/1.1\nContent-Length: nope\n\n");

        let written = pipeline.transport().written_str();
        assert!(written.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(written.contains("connection: close\r\n"));
        assert!(pipeline.transport().is_closed());
        assert_eq!(log.entries(), ["app:error"]);
    }

    #[test]
    fn oversized_request_gets_413() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "POST /upload HTTP/1.1\nContent-Length: 4096\n\n");

        assert!(pipeline.transport().written_str().starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(pipeline.transport().is_closed());
    }

    #[test]
    fn expect_continue_is_answered_before_the_body() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "POST /upload HTTP/1.1\nContent-Length: 5\nExpect: 100-continue\n\n");
        assert_eq!(pipeline.transport().written_str(), "HTTP/1.1 100 Continue\r\n\r\n");
        assert!(log.entries().is_empty());

        pipeline.fire_read(Inbound::Bytes(Buffer::copy_from_slice(b"hello")));
        assert_eq!(log.entries(), ["app:read:/upload"]);
    }

    #[test]
    fn responses_are_encoded() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        pipeline.write(Outbound::Response(Response::new(()), PayloadSize::Length(5)));
        pipeline.write(Outbound::Payload(PayloadItem::Chunk(Bytes::from_static(b"hel"))));
        pipeline.write(Outbound::Region(Bytes::from_static(b"lo")));
        pipeline.write(Outbound::Payload(PayloadItem::Eof));

        assert_eq!(pipeline.transport().written_str(), "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
        assert_eq!(pipeline.transport().regions(), 1);
    }

    #[test]
    fn bytes_behind_an_upgrade_request_go_to_the_replacement() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        let request = indoc! {"
            GET /ws HTTP/1.1
            Host: x
            Upgrade: websocket
            Connection: Upgrade

            "};
        feed(&mut pipeline, &format!("{request}frame-bytes"));
        assert_eq!(log.entries(), ["app:read:/ws"]);

        pipeline.add("frames", Recorder::new("frames", &log), Position::Replace("http-codec")).unwrap();

        assert_eq!(log.entries(), ["app:read:/ws", "frames:read:frame-bytes", "app:read:frame-bytes"]);
    }

    #[test]
    fn declined_upgrade_resumes_after_flush() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /chat HTTP/1.1\nUpgrade: websocket\nConnection: upgrade\n\nGET /next HTTP/1.1\n\n");
        assert_eq!(log.entries(), ["app:read:/chat"]);

        pipeline.write(Outbound::Response(status_only(StatusCode::NOT_FOUND), PayloadSize::Empty));
        let id = pipeline.flush();
        assert_eq!(log.entries(), ["app:read:/chat"]);

        pipeline.fire_event(LifecycleEvent::WriteComplete(id));
        assert_eq!(log.entries(), ["app:read:/chat", "app:event:write-complete", "app:read:/next"]);
    }
}
