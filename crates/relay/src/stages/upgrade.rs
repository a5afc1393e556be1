//! The upgrade handshake, and the frame level protocol once it is done.
//!
//! ```text
//!  Http ──valid request──▶ Upgrading ──101 flushed──▶ Upgraded
//!   ▲  │
//!   └──┘ rejected: 400 / 426, still HTTP
//! ```
//!
//! A valid request is answered with `101 Switching Protocols` and the HTTP
//! codec is swapped for the frame codec. Frames that arrive before the `101`
//! has reached the transport are held back; they are delivered, in order, right
//! after [`LifecycleEvent::HandshakeComplete`].
//!
//! Once upgraded the stage answers pings, echoes close frames, drops binary
//! messages and reassembles fragmented text, so only complete text frames
//! travel further.

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, DATE};
use http::HeaderValue;
use relay_http::protocol::{FullRequest, PayloadSize};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::connection::ConnectionState;
use crate::date::http_date;
use crate::error::RelayError;
use crate::pipeline::{HandshakeComplete, Inbound, LifecycleEvent, Outbound, Stage, StageContext, WriteId};
use crate::stages::{FRAME_CODEC, FrameCodecStage, HTTP_CODEC};
use crate::ws::{Frame, FrameError, OpCode, handshake};

#[derive(Debug)]
enum State {
    Http,
    Upgrading { write_id: WriteId, handshake: HandshakeComplete, held: Vec<Frame> },
    Upgraded,
}

/// A fragmented message being reassembled.
#[derive(Debug)]
struct Fragmented {
    text: bool,
    payload: BytesMut,
}

#[derive(Debug)]
pub struct UpgradeStage {
    max_frame_size: u64,
    state: State,
    fragmented: Option<Fragmented>,
}

impl UpgradeStage {
    /// `max_frame_size` bounds single frames and reassembled messages alike.
    pub fn new(max_frame_size: u64) -> Self {
        Self { max_frame_size, state: State::Http, fragmented: None }
    }

    fn handshake(&mut self, ctx: &mut StageContext<'_>, request: FullRequest<Buffer>) {
        let header = request.header();

        match handshake::validate(header) {
            Ok(key) => {
                ctx.write(Outbound::Response(handshake::accept_response(key), PayloadSize::Empty));
                let write_id = ctx.flush();
                ctx.replace_stage(HTTP_CODEC, FRAME_CODEC, FrameCodecStage::new(self.max_frame_size));

                ctx.connection().set_state(ConnectionState::Upgrading);
                let handshake = HandshakeComplete { uri: header.uri().clone(), headers: header.headers().clone() };
                self.state = State::Upgrading { write_id, handshake, held: Vec::new() };
            }
            Err(rejection) => {
                warn!(conn = %ctx.connection().id(), %rejection, "rejecting upgrade request");
                let keep_alive = header.is_keep_alive();

                let mut response = handshake::rejection_response(rejection);
                let headers = response.headers_mut();
                headers.insert(DATE, http_date());
                headers.insert(CONNECTION, HeaderValue::from_static(if keep_alive { "keep-alive" } else { "close" }));

                ctx.write_and_flush(Outbound::Response(response, PayloadSize::Empty));
                if !keep_alive {
                    ctx.close();
                }
            }
        }
    }

    fn on_frame(&mut self, ctx: &mut StageContext<'_>, frame: Frame) -> Result<(), FrameError> {
        match frame.opcode() {
            OpCode::Ping => {
                ctx.write_and_flush(Outbound::Frame(Frame::pong(frame.into_payload())));
            }
            OpCode::Pong => trace!(conn = %ctx.connection().id(), "pong received"),
            OpCode::Close => {
                debug!(conn = %ctx.connection().id(), code = ?frame.close_code(), "peer closed");
                ctx.write_and_flush(Outbound::Frame(Frame::new(true, OpCode::Close, frame.into_payload())));
                ctx.close();
            }
            OpCode::Text | OpCode::Binary => {
                if self.fragmented.is_some() {
                    return Err(FrameError::ExpectedContinuation);
                }
                let text = frame.opcode() == OpCode::Text;
                if frame.is_fin() {
                    self.complete(ctx, text, frame.into_payload())?;
                } else {
                    self.fragmented = Some(Fragmented { text, payload: BytesMut::from(frame.payload().as_ref()) });
                }
            }
            OpCode::Continuation => {
                let fragmented = self.fragmented.as_mut().ok_or(FrameError::UnexpectedContinuation)?;
                let size = (fragmented.payload.len() + frame.payload().len()) as u64;
                if size > self.max_frame_size {
                    return Err(FrameError::TooLarge { size, max_size: self.max_frame_size });
                }
                fragmented.payload.extend_from_slice(frame.payload());

                if frame.is_fin() {
                    if let Some(Fragmented { text, payload }) = self.fragmented.take() {
                        self.complete(ctx, text, payload.freeze())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn complete(&mut self, ctx: &mut StageContext<'_>, text: bool, payload: Bytes) -> Result<(), FrameError> {
        if !text {
            debug!(conn = %ctx.connection().id(), len = payload.len(), "dropping binary message");
            return Ok(());
        }

        std::str::from_utf8(&payload).map_err(|_utf8| FrameError::InvalidUtf8)?;
        ctx.fire_read(Inbound::Frame(Frame::text(payload)));
        Ok(())
    }

    fn deliver(&mut self, ctx: &mut StageContext<'_>, frame: Frame) -> Result<(), RelayError> {
        self.on_frame(ctx, frame).map_err(|e| {
            warn!(conn = %ctx.connection().id(), cause = %e, "closing on a protocol violation");
            ctx.write_and_flush(Outbound::Frame(Frame::close(e.close_code(), "")));
            ctx.close();
            RelayError::from(e)
        })
    }
}

impl Stage for UpgradeStage {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        match msg {
            Inbound::Request(request) if matches!(self.state, State::Http) => {
                self.handshake(ctx, request);
                Ok(())
            }
            Inbound::Frame(frame) => {
                if let State::Upgrading { held, .. } = &mut self.state {
                    trace!(conn = %ctx.connection().id(), "holding frame until the handshake completes");
                    held.push(frame);
                    Ok(())
                } else if matches!(self.state, State::Upgraded) {
                    self.deliver(ctx, frame)
                } else {
                    ctx.fire_read(Inbound::Frame(frame));
                    Ok(())
                }
            }
            msg => {
                ctx.fire_read(msg);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, ctx: &mut StageContext<'_>, event: LifecycleEvent) -> Result<(), RelayError> {
        let completed = match &event {
            LifecycleEvent::WriteComplete(id) => Some(*id),
            LifecycleEvent::Closed => {
                self.fragmented = None;
                None
            }
            _ => None,
        };

        ctx.fire_event(event);
        let Some(id) = completed else {
            return Ok(());
        };
        if !matches!(&self.state, State::Upgrading { write_id, .. } if *write_id == id) {
            return Ok(());
        }

        let State::Upgrading { handshake, held, .. } = std::mem::replace(&mut self.state, State::Upgraded) else {
            return Ok(());
        };
        ctx.connection().set_state(ConnectionState::Upgraded);
        debug!(conn = %ctx.connection().id(), path = handshake.uri.path(), "handshake complete");

        ctx.fire_event(LifecycleEvent::HandshakeComplete(handshake));
        for frame in held {
            self.deliver(ctx, frame)?;
        }
        Ok(())
    }
}
