use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::message::SharedMessage;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of an accepted connection, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Http = 0,
    Upgrading = 1,
    Upgraded = 2,
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Http,
            1 => ConnectionState::Upgrading,
            2 => ConnectionState::Upgraded,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a relayed message did not reach a member's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The member is not keeping up.
    Full,
    /// The member's connection is gone.
    Closed,
}

/// The shared face of one connection.
///
/// Stages reach their connection through this handle and the registry keeps
/// it for fan-out. It never owns the pipeline; the connection task does.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    state: AtomicU8,
    relay_tx: mpsc::Sender<SharedMessage>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// A handle plus the receiving end of its relay queue, which holds at most
    /// `relay_capacity` messages.
    pub fn channel(
        peer_addr: Option<SocketAddr>,
        relay_capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<SharedMessage>) {
        let (relay_tx, relay_rx) = mpsc::channel(relay_capacity.max(1));
        let handle = Self { id: ConnectionId::next(), peer_addr, state: AtomicU8::new(ConnectionState::Http as u8), relay_tx, cancel };
        (Arc::new(handle), relay_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Moves to `state`; a closed connection stays closed.
    pub fn set_state(&self, state: ConnectionState) {
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current != ConnectionState::Closed as u8).then_some(state as u8)
        });
        if let Ok(previous) = result {
            debug!(conn = %self.id, from = ?ConnectionState::from(previous), to = ?state, "connection state changed");
        }
    }

    /// Queues `message` for this connection without waiting.
    pub fn try_deliver(&self, message: SharedMessage) -> Result<(), DeliveryError> {
        self.relay_tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Asks the connection task to stop; writes still queued may be dropped.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn ids_are_unique() {
        let (a, _a_rx) = ConnectionHandle::channel(None, 1, CancellationToken::new());
        let (b, _b_rx) = ConnectionHandle::channel(None, 1, CancellationToken::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn closed_is_final() {
        let (handle, _rx) = ConnectionHandle::channel(None, 1, CancellationToken::new());
        assert_eq!(handle.state(), ConnectionState::Http);

        handle.set_state(ConnectionState::Upgraded);
        handle.set_state(ConnectionState::Closed);
        handle.set_state(ConnectionState::Http);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[test]
    fn delivery_reports_full_and_closed_queues() {
        let (handle, rx) = ConnectionHandle::channel(None, 1, CancellationToken::new());
        let message = Message::text(handle.id(), "hi").into_shared();

        assert_eq!(handle.try_deliver(message.clone()), Ok(()));
        assert_eq!(handle.try_deliver(message.clone()), Err(DeliveryError::Full));
        drop(rx);
        assert_eq!(handle.try_deliver(message), Err(DeliveryError::Closed));
    }
}
