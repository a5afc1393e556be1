//! The accept loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RelayConfig};
use crate::connection::RelayInitializer;
use crate::registry::BroadcastRegistry;
use crate::resource::ResourceLoader;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
}

/// A bound relay server, not yet accepting.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    initializer: RelayInitializer,
}

impl Server {
    pub async fn bind(config: RelayConfig, resources: Arc<dyn ResourceLoader>) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })?;
        info!(%addr, "listening");

        let initializer = RelayInitializer::new(Arc::new(config), Arc::new(BroadcastRegistry::new()), resources);
        Ok(Self { listener, initializer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        self.initializer.registry()
    }

    /// Accepts connections until the process is killed.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Accepts connections until `shutdown` completes, then cancels the open
    /// connections and waits for them to finish.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let Server { listener, initializer } = self;
        let root = CancellationToken::new();
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                Some(_finished) = connections.join_next(), if !connections.is_empty() => continue,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(cause = %e, "failed to set TCP_NODELAY");
            }

            let (reader, writer) = stream.into_split();
            let connection = match initializer.connection(reader, writer, Some(peer_addr), root.child_token()) {
                Ok(connection) => connection,
                Err(e) => {
                    error!(cause = %e, %peer_addr, "failed to set up connection");
                    continue;
                }
            };

            connections.spawn(async move {
                match connection.run().await {
                    Ok(()) => debug!(%peer_addr, "finished process, connection shutdown"),
                    Err(e) => warn!(cause = %e, %peer_addr, "connection ended with error"),
                }
            });
        }

        info!(open = connections.len(), "shutting down");
        root.cancel();
        while connections.join_next().await.is_some() {}
        info!("server stopped");
    }
}
