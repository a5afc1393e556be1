use tracing::{debug, warn};

use crate::error::RelayError;
use crate::pipeline::{Stage, StageContext};

/// The last stage: any error reaching it ends the connection, unless it is one
/// the connection survives.
#[derive(Debug, Default)]
pub struct ErrorHandlerStage;

impl Stage for ErrorHandlerStage {
    fn handle_error(&mut self, ctx: &mut StageContext<'_>, error: RelayError) {
        if error.is_fatal() {
            warn!(conn = %ctx.connection().id(), cause = %error, "closing connection after error");
            ctx.close();
        } else {
            debug!(conn = %ctx.connection().id(), cause = %error, "recoverable error");
        }
    }
}
