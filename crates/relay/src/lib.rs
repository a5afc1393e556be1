//! A websocket chat relay built on a per-connection pipeline of stages.
//!
//! Every accepted connection starts out speaking HTTP/1.1: `/` and other paths
//! are answered with static resources, and a request for the upgrade path is
//! answered with a websocket handshake. Once the handshake is written the
//! connection's pipeline swaps its HTTP codec for a frame codec, drops the
//! router and joins the [`BroadcastRegistry`]. From then on every text frame a
//! member sends is relayed to all members, the sender included.
//!
//! # Modules
//!
//! - [`pipeline`]: the stage chain, its events and the context stages act through
//! - [`stages`]: the stages a relay connection is built from
//! - [`connection`]: per-connection state and the task that drives a connection
//! - [`registry`]: the set of upgraded connections and the fan-out
//! - [`ws`]: websocket frames and the opening handshake
//! - [`buffer`]: reference counted, pooled byte buffers
//! - [`server`]: the accept loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use micro_relay::{RelayConfig, Server, StaticFiles};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default();
//!     let resources = StaticFiles::embedded(&config.index_file);
//!     let server = Server::bind(config, Arc::new(resources)).await?;
//!     server.run_until(async { tokio::signal::ctrl_c().await.unwrap_or_default() }).await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod date;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod resource;
pub mod server;
pub mod stages;
pub mod ws;

mod utils;
pub(crate) use utils::ensure;

pub use buffer::{Buffer, BufferPool};
pub use config::{ConfigError, JoinNotice, RelayConfig};
pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionState, RelayInitializer};
pub use error::RelayError;
pub use message::{Message, SharedMessage};
pub use registry::BroadcastRegistry;
pub use resource::{ResourceLoader, StaticFiles};
pub use server::{Server, ServerError};
