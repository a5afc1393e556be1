//! Accepted connections: the shared [`ConnectionHandle`] and the task that
//! drives a connection's pipeline over a socket.

mod driver;
mod handle;

pub use driver::{ChannelTransport, Connection, RelayInitializer};
pub use handle::{ConnectionHandle, ConnectionId, ConnectionState, DeliveryError};
