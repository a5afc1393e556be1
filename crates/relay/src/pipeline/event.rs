use bytes::Bytes;
use http::{HeaderMap, Uri};
use relay_http::protocol::{FullRequest, PayloadItem, PayloadSize, ResponseHead};

use crate::buffer::Buffer;
use crate::error::RelayError;
use crate::ws::Frame;

/// Identifies one flush; the matching [`LifecycleEvent::WriteComplete`] says
/// everything written before it has reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteId(pub(crate) u64);

/// Anything travelling from the transport towards the application.
#[derive(Debug)]
pub enum InboundEvent {
    Read(Inbound),
    Lifecycle(LifecycleEvent),
    Failure(RelayError),
}

/// Inbound data, from raw bytes up to decoded messages.
#[derive(Debug)]
pub enum Inbound {
    Bytes(Buffer),
    Request(FullRequest<Buffer>),
    Frame(Frame),
}

/// Control signals that flow through the same chain as data.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// The connection was accepted and its pipeline built.
    Active,
    /// The upgrade response has been written; framed traffic follows.
    HandshakeComplete(HandshakeComplete),
    WriteComplete(WriteId),
    /// The connection is gone.
    Closed,
}

/// Details of a finished upgrade handshake.
#[derive(Debug, Clone)]
pub struct HandshakeComplete {
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Anything travelling from the application towards the transport.
///
/// Only [`Outbound::Bytes`] and [`Outbound::Region`] may reach the transport;
/// the other variants have to be encoded by a stage on the way.
#[derive(Debug)]
pub enum Outbound {
    Response(ResponseHead, PayloadSize),
    Payload(PayloadItem),
    /// Body bytes written to the transport as they are, with no copy.
    Region(Bytes),
    Frame(Frame),
    Bytes(Buffer),
}

impl From<Inbound> for InboundEvent {
    fn from(inbound: Inbound) -> Self {
        InboundEvent::Read(inbound)
    }
}

impl From<LifecycleEvent> for InboundEvent {
    fn from(event: LifecycleEvent) -> Self {
        InboundEvent::Lifecycle(event)
    }
}

impl From<RelayError> for InboundEvent {
    fn from(error: RelayError) -> Self {
        InboundEvent::Failure(error)
    }
}
