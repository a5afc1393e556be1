//! The set of upgraded connections, and fan-out to all of them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use crate::message::SharedMessage;

/// Live members of the chat.
///
/// A broadcast holds the read lock while it queues the message for each
/// member, and joins and leaves take the write lock, so a member removed by a
/// returned [`BroadcastRegistry::remove`] is never handed a later message.
/// Queueing never waits: the lock is never held across I/O.
#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    members: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection already was a member.
    pub fn add(&self, connection: Arc<ConnectionHandle>) -> bool {
        let id = connection.id();
        let added = self.members.write().insert(id, connection).is_none();
        if added {
            debug!(conn = %id, "joined the relay");
        }
        added
    }

    /// Returns `false` if the connection was not a member.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.members.write().remove(&id).is_some();
        if removed {
            debug!(conn = %id, "left the relay");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Ids of the current members, in no particular order.
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.read().keys().copied().collect()
    }

    /// Queues `message` for every member and returns how many took it.
    ///
    /// A member whose queue is full is removed and its connection closed, the
    /// way a member whose connection is already gone is removed.
    pub fn broadcast(&self, message: &SharedMessage) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        {
            let members = self.members.read();
            for (id, member) in members.iter() {
                match member.try_deliver(SharedMessage::clone(message)) {
                    Ok(()) => delivered += 1,
                    Err(DeliveryError::Full) => {
                        warn!(conn = %id, "relay queue full, dropping slow member");
                        member.close();
                        evicted.push(*id);
                    }
                    Err(DeliveryError::Closed) => {
                        debug!(conn = %id, "member already gone");
                        evicted.push(*id);
                    }
                }
            }
        }

        if !evicted.is_empty() {
            let mut members = self.members.write();
            for id in &evicted {
                members.remove(id);
            }
        }

        debug!(origin = %message.origin(), delivered, evicted = evicted.len(), "broadcast message");
        delivered
    }
}
