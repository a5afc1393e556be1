//! Helpers for driving pipelines in tests without a socket.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::message::SharedMessage;
use crate::pipeline::{Inbound, LifecycleEvent, Outbound, Pipeline, Stage, StageContext, Transport, TransportWrite};

/// Keeps every write in order; clones share the same record.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingTransport {
    writes: Arc<Mutex<Vec<TransportWrite>>>,
}

impl RecordingTransport {
    pub(crate) fn writes(&self) -> Vec<TransportWrite> {
        self.writes.lock().clone()
    }

    /// Everything written so far, bytes and regions alike, as one block.
    pub(crate) fn written(&self) -> Bytes {
        let mut out = BytesMut::new();
        for write in self.writes.lock().iter() {
            if let TransportWrite::Bytes(bytes) | TransportWrite::Region(bytes) = write {
                out.extend_from_slice(bytes);
            }
        }
        out.freeze()
    }

    pub(crate) fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub(crate) fn regions(&self) -> usize {
        self.writes.lock().iter().filter(|write| matches!(write, TransportWrite::Region(_))).count()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.writes.lock().contains(&TransportWrite::Close)
    }

    pub(crate) fn clear(&self) {
        self.writes.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, write: TransportWrite) {
        self.writes.lock().push(write);
    }
}

pub(crate) fn test_handle() -> (Arc<ConnectionHandle>, mpsc::Receiver<SharedMessage>) {
    ConnectionHandle::channel(None, 16, CancellationToken::new())
}

pub(crate) fn test_pipeline() -> Pipeline<RecordingTransport> {
    let (handle, _rx) = test_handle();
    Pipeline::new(handle, RecordingTransport::default())
}

/// Shared, ordered record of what recorders saw.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Forwards everything and writes down what passed by.
#[derive(Debug)]
pub(crate) struct Recorder {
    tag: &'static str,
    log: Log,
}

impl Recorder {
    pub(crate) fn new(tag: &'static str, log: &Log) -> Self {
        Self { tag, log: log.clone() }
    }
}

impl Stage for Recorder {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        let what = match &msg {
            Inbound::Bytes(buffer) => String::from_utf8_lossy(&buffer.to_bytes()?).into_owned(),
            Inbound::Request(request) => request.header().path().to_owned(),
            Inbound::Frame(frame) => String::from_utf8_lossy(frame.payload()).into_owned(),
        };
        self.log.push(format!("{}:read:{what}", self.tag));
        ctx.fire_read(msg);
        Ok(())
    }

    fn handle_event(&mut self, ctx: &mut StageContext<'_>, event: LifecycleEvent) -> Result<(), RelayError> {
        let kind = match &event {
            LifecycleEvent::Active => "active",
            LifecycleEvent::HandshakeComplete(_) => "handshake",
            LifecycleEvent::WriteComplete(_) => "write-complete",
            LifecycleEvent::Closed => "closed",
        };
        self.log.push(format!("{}:event:{kind}", self.tag));
        ctx.fire_event(event);
        Ok(())
    }

    fn handle_error(&mut self, ctx: &mut StageContext<'_>, error: RelayError) {
        self.log.push(format!("{}:error", self.tag));
        ctx.fire_error(error);
    }

    fn handle_write(&mut self, ctx: &mut StageContext<'_>, msg: Outbound) -> Result<(), RelayError> {
        self.log.push(format!("{}:write", self.tag));
        ctx.write(msg);
        Ok(())
    }
}
