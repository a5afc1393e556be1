use crate::error::RelayError;
use crate::pipeline::{Inbound, LifecycleEvent, Outbound, StageContext};

/// One processing unit of a connection pipeline.
///
/// Every handler defaults to passing its input on unchanged, so a stage only
/// implements the directions it cares about. An `Err` returned by a handler is
/// delivered to the same stage's [`Stage::handle_error`].
pub trait Stage: Send {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        ctx.fire_read(msg);
        Ok(())
    }

    fn handle_event(&mut self, ctx: &mut StageContext<'_>, event: LifecycleEvent) -> Result<(), RelayError> {
        ctx.fire_event(event);
        Ok(())
    }

    fn handle_error(&mut self, ctx: &mut StageContext<'_>, error: RelayError) {
        ctx.fire_error(error);
    }

    fn handle_write(&mut self, ctx: &mut StageContext<'_>, msg: Outbound) -> Result<(), RelayError> {
        ctx.write(msg);
        Ok(())
    }

    /// Whether the stage rewrites raw bytes on their way out (compression,
    /// encryption). Stages above one must not hand regions to the transport.
    fn transforms_bytes(&self) -> bool {
        false
    }

    /// Called once the stage has left the pipeline. Returned data is delivered
    /// to whatever now sits where the stage was.
    fn on_removed(&mut self) -> Option<Inbound> {
        None
    }
}
