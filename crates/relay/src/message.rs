//! Messages relayed between upgraded connections.

use bytes::Bytes;

use crate::connection::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Text a client sent.
    Text,
    /// Generated by the relay itself, like a join announcement.
    Notice,
}

/// An immutable text payload and the connection it came from.
///
/// Fan-out shares one message between all members (see [`SharedMessage`]),
/// and the payload is a [`Bytes`] so every member's frame reuses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: ConnectionId,
    kind: MessageKind,
    payload: Bytes,
}

/// A message as handed to the registry.
pub type SharedMessage = triomphe::Arc<Message>;

impl Message {
    pub fn text(origin: ConnectionId, text: impl Into<String>) -> Self {
        Self { origin, kind: MessageKind::Text, payload: Bytes::from(text.into()) }
    }

    /// `Client <id> joined`
    pub fn joined(origin: ConnectionId) -> Self {
        Self { origin, kind: MessageKind::Notice, payload: Bytes::from(format!("Client {origin} joined")) }
    }

    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The UTF-8 payload, ready to become a text frame.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn as_str(&self) -> &str {
        // built from a String, so always valid
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }

    pub fn into_shared(self) -> SharedMessage {
        triomphe::Arc::new(self)
    }
}
