//! Per-connection stage pipelines.
//!
//! A [`Pipeline`] is an ordered list of named [`Stage`]s bound to one
//! connection. Inbound events enter at the first stage and each stage forwards,
//! transforms or consumes them; outbound writes start at the stage that issued
//! them (or at the last stage) and travel back towards the [`Transport`].
//!
//! ```text
//!            Transport
//!               ↑ ↓
//!   ┌───────────────────────┐
//!   │ http-codec            │  bytes ↔ requests / responses
//!   │ router                │  static resources
//!   │ upgrade               │  handshake, control frames
//!   │ relay                 │  registry membership, fan-out
//!   │ errors                │  logs and closes
//!   └───────────────────────┘
//! ```
//!
//! # Dispatch
//!
//! A stage never calls its neighbours directly. It records what it wants
//! through its [`StageContext`] and the pipeline carries those requests out
//! after the handler returns, depth first and in the order they were made, so
//! a response written while handling a request leaves before anything the
//! request triggers further down.
//!
//! Adding, replacing and removing stages from inside a handler is deferred
//! until the event being dispatched, and everything it caused, has been fully
//! handled. No event ever sees a half-changed chain.

mod context;
mod event;
mod stage;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::connection::ConnectionHandle;
use crate::error::RelayError;

pub(crate) use context::{Action, Mutation};
pub use context::StageContext;
pub use event::{HandshakeComplete, Inbound, InboundEvent, LifecycleEvent, Outbound, WriteId};
pub use stage::Stage;

/// Where a stage goes when it is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
    Before(&'static str),
    After(&'static str),
    /// Takes the place of the named stage, which is removed.
    Replace(&'static str),
}

/// What the pipeline hands to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportWrite {
    Bytes(Bytes),
    /// Bytes to be written without going through the transport's own buffering.
    Region(Bytes),
    Flush(WriteId),
    Close,
}

/// The write side of the connection underneath a pipeline.
pub trait Transport: Send {
    fn write(&mut self, write: TransportWrite);
}

struct Entry {
    name: &'static str,
    stage: Box<dyn Stage>,
}

enum Work {
    /// An event for the stage at this index; past the end it reaches the tail.
    Inbound(usize, InboundEvent),
    /// A write for the stages below this position; at zero it reaches the transport.
    Outbound(usize, Outbound),
    Flush(WriteId),
    Close,
}

pub struct Pipeline<T> {
    connection: Arc<ConnectionHandle>,
    stages: Vec<Entry>,
    transport: T,
    mutations: Vec<Mutation>,
    next_write_id: u64,
    closing: bool,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(connection: Arc<ConnectionHandle>, transport: T) -> Self {
        Self { connection, stages: Vec::new(), transport, mutations: Vec::new(), next_write_id: 1, closing: false }
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Stage names, first to last.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|entry| entry.name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|entry| entry.name == name)
    }

    /// Whether a close has been requested; reads are no longer delivered.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn add(&mut self, name: &'static str, stage: impl Stage + 'static, position: Position) -> Result<(), RelayError> {
        if let Some((index, mut replaced)) = self.insert(name, Box::new(stage), position)? {
            if let Some(leftover) = replaced.on_removed() {
                self.run(Work::Inbound(index, InboundEvent::Read(leftover)));
            }
        }
        Ok(())
    }

    pub fn add_last(&mut self, name: &'static str, stage: impl Stage + 'static) -> Result<(), RelayError> {
        self.add(name, stage, Position::Last)
    }

    pub fn remove(&mut self, name: &str) -> Result<Box<dyn Stage>, RelayError> {
        let (index, mut stage) = self.detach(name)?;
        if let Some(leftover) = stage.on_removed() {
            self.run(Work::Inbound(index, InboundEvent::Read(leftover)));
        }
        Ok(stage)
    }

    /// Delivers `event` to the first stage and runs everything it leads to.
    pub fn dispatch(&mut self, event: InboundEvent) {
        self.run(Work::Inbound(0, event));
    }

    pub fn fire_read(&mut self, msg: Inbound) {
        self.dispatch(InboundEvent::Read(msg));
    }

    pub fn fire_event(&mut self, event: LifecycleEvent) {
        self.dispatch(InboundEvent::Lifecycle(event));
    }

    pub fn fire_error(&mut self, error: RelayError) {
        self.dispatch(InboundEvent::Failure(error));
    }

    /// Writes `msg` from the last stage towards the transport.
    pub fn write(&mut self, msg: Outbound) {
        self.run(Work::Outbound(self.stages.len(), msg));
    }

    pub fn flush(&mut self) -> WriteId {
        let id = WriteId(self.next_write_id);
        self.next_write_id += 1;
        self.run(Work::Flush(id));
        id
    }

    pub fn write_and_flush(&mut self, msg: Outbound) -> WriteId {
        self.write(msg);
        self.flush()
    }

    pub fn close(&mut self) {
        self.run(Work::Close);
    }

    fn run(&mut self, first: Work) {
        let mut queue = VecDeque::from([first]);
        loop {
            while let Some(work) = queue.pop_front() {
                let follow_ups = self.step(work);
                for work in follow_ups.into_iter().rev() {
                    queue.push_front(work);
                }
            }

            let leftovers = self.apply_mutations();
            if leftovers.is_empty() {
                return;
            }
            queue.extend(leftovers);
        }
    }

    fn step(&mut self, work: Work) -> Vec<Work> {
        match work {
            Work::Inbound(index, event) => self.step_inbound(index, event),
            Work::Outbound(0, msg) => self.to_transport(msg),
            Work::Outbound(position, msg) => self.step_outbound(position - 1, msg),
            Work::Flush(id) => {
                if !self.closing {
                    self.transport.write(TransportWrite::Flush(id));
                }
                Vec::new()
            }
            Work::Close => {
                if !self.closing {
                    debug!(conn = %self.connection.id(), "closing connection");
                    self.closing = true;
                    self.transport.write(TransportWrite::Close);
                }
                Vec::new()
            }
        }
    }

    fn step_inbound(&mut self, index: usize, event: InboundEvent) -> Vec<Work> {
        if self.closing && matches!(event, InboundEvent::Read(_)) {
            trace!(conn = %self.connection.id(), "dropping read on a closing connection");
            return Vec::new();
        }

        if index >= self.stages.len() {
            return self.tail(event);
        }

        let byte_transformer_ahead = self.byte_transformer_before(index);
        let entry = &mut self.stages[index];
        let mut ctx =
            StageContext::new(entry.name, &self.connection, &mut self.mutations, &mut self.next_write_id, byte_transformer_ahead);

        let result = match event {
            InboundEvent::Read(msg) => entry.stage.handle_read(&mut ctx, msg),
            InboundEvent::Lifecycle(event) => entry.stage.handle_event(&mut ctx, event),
            InboundEvent::Failure(error) => {
                entry.stage.handle_error(&mut ctx, error);
                Ok(())
            }
        };

        let name = entry.name;
        let actions = ctx.into_actions();
        self.follow_ups(index, name, actions, result)
    }

    fn step_outbound(&mut self, index: usize, msg: Outbound) -> Vec<Work> {
        let byte_transformer_ahead = self.byte_transformer_before(index);
        let entry = &mut self.stages[index];
        let mut ctx =
            StageContext::new(entry.name, &self.connection, &mut self.mutations, &mut self.next_write_id, byte_transformer_ahead);

        let result = entry.stage.handle_write(&mut ctx, msg);

        let name = entry.name;
        let actions = ctx.into_actions();
        self.follow_ups(index, name, actions, result)
    }

    fn follow_ups(&self, index: usize, name: &'static str, actions: Vec<Action>, result: Result<(), RelayError>) -> Vec<Work> {
        let mut work: Vec<Work> = actions
            .into_iter()
            .map(|action| match action {
                Action::Fire(event) => Work::Inbound(index + 1, event),
                Action::Write(msg) => Work::Outbound(index, msg),
                Action::Flush(id) => Work::Flush(id),
                Action::Close => Work::Close,
            })
            .collect();

        if let Err(e) = result {
            debug!(conn = %self.connection.id(), stage = name, cause = %e, "stage failed");
            work.push(Work::Inbound(index, InboundEvent::Failure(e)));
        }
        work
    }

    fn to_transport(&mut self, msg: Outbound) -> Vec<Work> {
        if self.closing {
            trace!(conn = %self.connection.id(), "dropping write on a closing connection");
            return Vec::new();
        }

        match msg {
            Outbound::Bytes(buffer) => match buffer.into_bytes() {
                Ok(bytes) => self.transport.write(TransportWrite::Bytes(bytes)),
                Err(e) => return vec![Work::Inbound(0, InboundEvent::Failure(e.into()))],
            },
            Outbound::Region(bytes) => self.transport.write(TransportWrite::Region(bytes)),
            msg => {
                error!(conn = %self.connection.id(), kind = outbound_kind(&msg), "unencoded message reached the transport");
                let e = RelayError::pipeline(format!("no stage encoded the outbound {}", outbound_kind(&msg)));
                return vec![Work::Inbound(0, InboundEvent::Failure(e))];
            }
        }
        Vec::new()
    }

    fn tail(&self, event: InboundEvent) -> Vec<Work> {
        let conn = self.connection.id();
        match event {
            InboundEvent::Read(msg) => debug!(%conn, kind = inbound_kind(&msg), "message reached the end of the pipeline, discarded"),
            InboundEvent::Lifecycle(event) => trace!(%conn, ?event, "lifecycle event reached the end of the pipeline"),
            InboundEvent::Failure(e) => {
                warn!(%conn, cause = %e, "error reached the end of the pipeline");
                if e.is_fatal() {
                    return vec![Work::Close];
                }
            }
        }
        Vec::new()
    }

    fn apply_mutations(&mut self) -> Vec<Work> {
        let mut leftovers = Vec::new();

        for mutation in std::mem::take(&mut self.mutations) {
            let result = match mutation {
                Mutation::Add { name, stage, position } => self.insert(name, stage, position),
                Mutation::Remove(name) if !self.contains(name) => {
                    debug!(conn = %self.connection.id(), stage = name, "stage already gone");
                    Ok(None)
                }
                Mutation::Remove(name) => self.detach(name).map(Some),
            };

            match result {
                Ok(Some((index, mut removed))) => {
                    if let Some(leftover) = removed.on_removed() {
                        leftovers.push(Work::Inbound(index, InboundEvent::Read(leftover)));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(conn = %self.connection.id(), cause = %e, "failed to change the pipeline");
                    leftovers.push(Work::Inbound(0, InboundEvent::Failure(e)));
                }
            }
        }

        leftovers
    }

    /// Puts a stage in place, returning the stage it replaced and where it was.
    fn insert(
        &mut self,
        name: &'static str,
        stage: Box<dyn Stage>,
        position: Position,
    ) -> Result<Option<(usize, Box<dyn Stage>)>, RelayError> {
        let duplicate = match position {
            Position::Replace(target) => target != name && self.contains(name),
            _ => self.contains(name),
        };
        if duplicate {
            return Err(RelayError::pipeline(format!("stage `{name}` already exists")));
        }

        let index = match position {
            Position::First => 0,
            Position::Last => self.stages.len(),
            Position::Before(target) => self.index_of(target)?,
            Position::After(target) => self.index_of(target)? + 1,
            Position::Replace(target) => {
                let index = self.index_of(target)?;
                let old = std::mem::replace(&mut self.stages[index], Entry { name, stage });
                debug!(conn = %self.connection.id(), old = old.name, new = name, "replaced stage");
                return Ok(Some((index, old.stage)));
            }
        };

        self.stages.insert(index, Entry { name, stage });
        trace!(conn = %self.connection.id(), stage = name, index, "added stage");
        Ok(None)
    }

    fn detach(&mut self, name: &str) -> Result<(usize, Box<dyn Stage>), RelayError> {
        let index = self.index_of(name)?;
        let entry = self.stages.remove(index);
        debug!(conn = %self.connection.id(), stage = entry.name, "removed stage");
        Ok((index, entry.stage))
    }

    fn index_of(&self, name: &str) -> Result<usize, RelayError> {
        self.stages
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| RelayError::pipeline(format!("no stage named `{name}`")))
    }

    fn byte_transformer_before(&self, index: usize) -> bool {
        self.stages[..index].iter().any(|entry| entry.stage.transforms_bytes())
    }
}

fn inbound_kind(msg: &Inbound) -> &'static str {
    match msg {
        Inbound::Bytes(_) => "bytes",
        Inbound::Request(_) => "request",
        Inbound::Frame(_) => "frame",
    }
}

fn outbound_kind(msg: &Outbound) -> &'static str {
    match msg {
        Outbound::Response(..) => "response",
        Outbound::Payload(_) => "payload",
        Outbound::Region(_) => "region",
        Outbound::Frame(_) => "frame",
        Outbound::Bytes(_) => "bytes",
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("connection", &self.connection.id())
            .field("stages", &self.stages.iter().map(|entry| entry.name).collect::<Vec<_>>())
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}
