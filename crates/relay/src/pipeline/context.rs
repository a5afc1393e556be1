use std::fmt;
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::pipeline::{Inbound, InboundEvent, LifecycleEvent, Outbound, Position, Stage, WriteId};

/// What a stage asked for while handling one event, in the order it asked.
pub(crate) enum Action {
    Fire(InboundEvent),
    Write(Outbound),
    Flush(WriteId),
    Close,
}

/// A pipeline change, applied once the current dispatch has finished.
pub(crate) enum Mutation {
    Add { name: &'static str, stage: Box<dyn Stage>, position: Position },
    Remove(&'static str),
}

/// A stage's view of its pipeline while it handles one event.
///
/// Nothing happens immediately: firing, writing and flushing are recorded and
/// carried out by the pipeline right after the handler returns, and stage
/// changes wait until the whole dispatch has finished.
pub struct StageContext<'a> {
    name: &'static str,
    connection: &'a Arc<ConnectionHandle>,
    actions: Vec<Action>,
    mutations: &'a mut Vec<Mutation>,
    next_write_id: &'a mut u64,
    byte_transformer_ahead: bool,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        name: &'static str,
        connection: &'a Arc<ConnectionHandle>,
        mutations: &'a mut Vec<Mutation>,
        next_write_id: &'a mut u64,
        byte_transformer_ahead: bool,
    ) -> Self {
        Self { name, connection, actions: Vec::new(), mutations, next_write_id, byte_transformer_ahead }
    }

    pub(crate) fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// Name of the stage being run.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        self.connection
    }

    /// Passes `msg` to the next stage.
    pub fn fire_read(&mut self, msg: Inbound) {
        self.actions.push(Action::Fire(InboundEvent::Read(msg)));
    }

    pub fn fire_event(&mut self, event: LifecycleEvent) {
        self.actions.push(Action::Fire(InboundEvent::Lifecycle(event)));
    }

    pub fn fire_error(&mut self, error: RelayError) {
        self.actions.push(Action::Fire(InboundEvent::Failure(error)));
    }

    /// Sends `msg` towards the transport, through the stages before this one.
    pub fn write(&mut self, msg: Outbound) {
        self.actions.push(Action::Write(msg));
    }

    /// Pushes everything written so far to the transport. A
    /// [`LifecycleEvent::WriteComplete`] with the returned id follows once it is out.
    pub fn flush(&mut self) -> WriteId {
        let id = WriteId(*self.next_write_id);
        *self.next_write_id += 1;
        self.actions.push(Action::Flush(id));
        id
    }

    pub fn write_and_flush(&mut self, msg: Outbound) -> WriteId {
        self.write(msg);
        self.flush()
    }

    /// Closes the connection after everything written so far.
    pub fn close(&mut self) {
        self.actions.push(Action::Close);
    }

    pub fn add_stage(&mut self, name: &'static str, stage: impl Stage + 'static, position: Position) {
        self.mutations.push(Mutation::Add { name, stage: Box::new(stage), position });
    }

    /// Replaces the stage called `target` with `stage`, named `name`.
    pub fn replace_stage(&mut self, target: &'static str, name: &'static str, stage: impl Stage + 'static) {
        self.add_stage(name, stage, Position::Replace(target));
    }

    pub fn remove_stage(&mut self, name: &'static str) {
        self.mutations.push(Mutation::Remove(name));
    }

    /// Whether a stage between this one and the transport rewrites bytes.
    pub fn has_byte_transformer(&self) -> bool {
        self.byte_transformer_ahead
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("name", &self.name)
            .field("connection", &self.connection.id())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}
