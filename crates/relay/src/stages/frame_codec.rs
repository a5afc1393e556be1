//! Frame codec stage, installed in place of the HTTP codec once a connection
//! has switched protocols.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::buffer::Buffer;
use crate::error::RelayError;
use crate::pipeline::{Inbound, Outbound, Stage, StageContext};
use crate::ws::{Frame, FrameDecoder, FrameEncoder, FrameError};

#[derive(Debug)]
pub struct FrameCodecStage {
    cumulation: BytesMut,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    failed: bool,
}

impl FrameCodecStage {
    pub fn new(max_frame_size: u64) -> Self {
        Self { cumulation: BytesMut::new(), decoder: FrameDecoder::new(max_frame_size), encoder: FrameEncoder::new(), failed: false }
    }

    fn encode(&mut self, ctx: &mut StageContext<'_>, frame: Frame) -> Result<(), RelayError> {
        let mut dst = BytesMut::new();
        self.encoder.encode(frame, &mut dst)?;
        ctx.write(Outbound::Bytes(Buffer::wrap(dst.freeze())));
        Ok(())
    }

    /// Tells the peer why with a close frame, then closes.
    fn fail(&mut self, ctx: &mut StageContext<'_>, e: FrameError) -> RelayError {
        warn!(conn = %ctx.connection().id(), cause = %e, "closing on a malformed frame");
        self.failed = true;
        self.cumulation.clear();

        if self.encode(ctx, Frame::close(e.close_code(), "")).is_ok() {
            ctx.flush();
        }
        ctx.close();
        RelayError::from(e)
    }
}

impl Stage for FrameCodecStage {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        let Inbound::Bytes(mut buffer) = msg else {
            ctx.fire_read(msg);
            return Ok(());
        };

        if self.failed {
            return Ok(());
        }

        buffer.read_into(&mut self.cumulation)?;
        loop {
            match self.decoder.decode(&mut self.cumulation) {
                Ok(Some(frame)) => ctx.fire_read(Inbound::Frame(frame)),
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(ctx, e)),
            }
        }
    }

    fn handle_write(&mut self, ctx: &mut StageContext<'_>, msg: Outbound) -> Result<(), RelayError> {
        match msg {
            Outbound::Frame(frame) => self.encode(ctx, frame),
            msg => {
                ctx.write(msg);
                Ok(())
            }
        }
    }
}
