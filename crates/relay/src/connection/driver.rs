//! Drives one connection.
//!
//! The read side owns the pipeline and feeds it, in strict sequence, with
//! socket reads, write completions and messages relayed from other
//! connections. The write side drains what the pipeline hands the transport
//! into the socket. The two are joined on the same task and talk through
//! channels, so a slow socket never blocks dispatch and nothing is shared
//! between connections but the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::buffer::BufferPool;
use crate::config::RelayConfig;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::error::RelayError;
use crate::message::SharedMessage;
use crate::pipeline::{Inbound, LifecycleEvent, Outbound, Pipeline, Transport, TransportWrite, WriteId};
use crate::registry::BroadcastRegistry;
use crate::resource::ResourceLoader;
use crate::stages::{
    ERRORS, ErrorHandlerStage, HTTP_CODEC, HttpCodecStage, RELAY, ROUTER, RelayStage, RouterStage, UPGRADE, UpgradeStage,
};
use crate::ws::Frame;

/// Read buffers kept for reuse, shared by all connections of one initializer.
const MAX_POOLED_BUFFERS: usize = 256;

/// Relayed messages written per wake up before the connection flushes.
const RELAY_BATCH: usize = 64;

/// Hands transport writes to the connection's write side.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportWrite>,
}

impl Transport for ChannelTransport {
    fn write(&mut self, write: TransportWrite) {
        if self.tx.send(write).is_err() {
            trace!("write side gone, dropping write");
        }
    }
}

/// Builds the pipeline of every accepted connection.
#[derive(Clone)]
pub struct RelayInitializer {
    config: Arc<RelayConfig>,
    registry: Arc<BroadcastRegistry>,
    resources: Arc<dyn ResourceLoader>,
    pool: BufferPool,
}

impl RelayInitializer {
    pub fn new(config: Arc<RelayConfig>, registry: Arc<BroadcastRegistry>, resources: Arc<dyn ResourceLoader>) -> Self {
        let pool = BufferPool::new(config.read_buffer_size, MAX_POOLED_BUFFERS);
        Self { config, registry, resources, pool }
    }

    pub fn config(&self) -> &Arc<RelayConfig> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Adds the stages every connection starts with.
    pub fn init_pipeline<T: Transport>(&self, pipeline: &mut Pipeline<T>) -> Result<(), RelayError> {
        let config = &self.config;
        pipeline.add_last(HTTP_CODEC, HttpCodecStage::new(config.max_request_size))?;
        pipeline.add_last(ROUTER, RouterStage::new(&config.upgrade_path, &config.index_file, Arc::clone(&self.resources)))?;
        pipeline.add_last(UPGRADE, UpgradeStage::new(config.max_frame_size))?;
        pipeline.add_last(RELAY, RelayStage::new(Arc::clone(&self.registry), config.join_notice, config.announce_first_join))?;
        pipeline.add_last(ERRORS, ErrorHandlerStage)?;
        Ok(())
    }

    /// Sets up a connection over `reader` and `writer`; it stops once `cancel` fires.
    pub fn connection<R, W>(
        &self,
        reader: R,
        writer: W,
        peer_addr: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Result<Connection<R, W>, RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (handle, relay_rx) = ConnectionHandle::channel(peer_addr, self.config.relay_queue_capacity, cancel);
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let mut pipeline = Pipeline::new(Arc::clone(&handle), ChannelTransport { tx: write_tx });
        self.init_pipeline(&mut pipeline)?;

        Ok(Connection { reader, writer, pipeline, relay_rx, write_rx, pool: self.pool.clone() })
    }
}

impl std::fmt::Debug for RelayInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayInitializer").field("config", &self.config).field("members", &self.registry.len()).finish_non_exhaustive()
    }
}

/// One accepted connection, ready to be driven with [`Connection::run`].
#[derive(Debug)]
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    pipeline: Pipeline<ChannelTransport>,
    relay_rx: mpsc::Receiver<SharedMessage>,
    write_rx: mpsc::UnboundedReceiver<TransportWrite>,
    pool: BufferPool,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        self.pipeline.connection()
    }

    /// Runs the connection until either side closes it or it is cancelled.
    ///
    /// Read failures travel through the pipeline like any other error and end
    /// the connection there; the error returned is the write side's.
    pub async fn run(self) -> Result<(), RelayError> {
        let Connection { reader, writer, pipeline, relay_rx, write_rx, pool } = self;
        let handle = Arc::clone(pipeline.connection());
        let cancel = handle.cancel_token().clone();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        info!(conn = %handle.id(), peer = ?handle.peer_addr(), "connection opened");

        let read_side = read_loop(pipeline, reader, relay_rx, done_rx, pool);
        let write_side = write_loop(writer, write_rx, done_tx, cancel.clone());
        let ((), result) = tokio::join!(read_side, write_side);

        info!(conn = %handle.id(), "connection closed");
        result
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut pipeline: Pipeline<ChannelTransport>,
    mut reader: R,
    mut relay_rx: mpsc::Receiver<SharedMessage>,
    mut done_rx: mpsc::UnboundedReceiver<WriteId>,
    pool: BufferPool,
) {
    let cancel = pipeline.connection().cancel_token().clone();
    let mut storage = pool.take_storage();

    pipeline.fire_event(LifecycleEvent::Active);

    loop {
        select! {
            biased;

            () = cancel.cancelled() => break,

            Some(id) = done_rx.recv() => pipeline.fire_event(LifecycleEvent::WriteComplete(id)),

            Some(message) = relay_rx.recv() => relay(&mut pipeline, &message, &mut relay_rx),

            read = reader.read_buf(&mut storage) => match read {
                Ok(0) => {
                    debug!(conn = %pipeline.connection().id(), "peer closed the connection");
                    break;
                }
                Ok(_) => {
                    let filled = std::mem::replace(&mut storage, pool.take_storage());
                    pipeline.fire_read(Inbound::Bytes(pool.wrap(filled)));
                }
                Err(e) => {
                    pipeline.fire_error(RelayError::from(e));
                    break;
                }
            },
        }
    }

    pipeline.fire_event(LifecycleEvent::Closed);
    pipeline.connection().set_state(ConnectionState::Closed);
    // dropping the pipeline closes the write channel, which lets the write side finish
}

/// Writes relayed messages as text frames, a batch at a time, then flushes.
fn relay(pipeline: &mut Pipeline<ChannelTransport>, first: &SharedMessage, relay_rx: &mut mpsc::Receiver<SharedMessage>) {
    pipeline.write(Outbound::Frame(Frame::text(first.payload().clone())));
    for _ in 1..RELAY_BATCH {
        let Ok(message) = relay_rx.try_recv() else {
            break;
        };
        pipeline.write(Outbound::Frame(Frame::text(message.payload().clone())));
    }
    pipeline.flush();
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: W,
    mut write_rx: mpsc::UnboundedReceiver<TransportWrite>,
    done_tx: mpsc::UnboundedSender<WriteId>,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let mut framed = FramedWrite::new(writer, BytesCodec::new());

    let result = select! {
        biased;
        () = cancel.cancelled() => Ok(()),
        result = drain_writes(&mut framed, &mut write_rx, &done_tx) => result,
    };

    // stops the read side whichever way this side ended
    cancel.cancel();
    result
}

async fn drain_writes<W: AsyncWrite + Unpin>(
    framed: &mut FramedWrite<W, BytesCodec>,
    write_rx: &mut mpsc::UnboundedReceiver<TransportWrite>,
    done_tx: &mpsc::UnboundedSender<WriteId>,
) -> Result<(), RelayError> {
    while let Some(write) = write_rx.recv().await {
        match write {
            TransportWrite::Bytes(bytes) => framed.feed(bytes).await?,
            TransportWrite::Region(bytes) => {
                SinkExt::<bytes::Bytes>::flush(framed).await?;
                framed.get_mut().write_all(&bytes).await?;
            }
            TransportWrite::Flush(id) => {
                SinkExt::<bytes::Bytes>::flush(framed).await?;
                if done_tx.send(id).is_err() {
                    trace!("read side gone, dropping write completion");
                }
            }
            TransportWrite::Close => break,
        }
    }

    SinkExt::<bytes::Bytes>::flush(framed).await?;
    framed.get_mut().shutdown().await?;
    Ok(())
}
