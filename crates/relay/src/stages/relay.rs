//! The chat itself: registry membership and fan-out of text messages.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::JoinNotice;
use crate::error::RelayError;
use crate::message::Message;
use crate::pipeline::{Inbound, LifecycleEvent, Stage, StageContext};
use crate::registry::BroadcastRegistry;
use crate::stages::ROUTER;
use crate::ws::OpCode;

/// Joins the registry when the handshake completes, relays every text frame
/// to all members (the sender included) and leaves when the connection closes.
#[derive(Debug)]
pub struct RelayStage {
    registry: Arc<BroadcastRegistry>,
    join_notice: JoinNotice,
    announce_first_join: bool,
}

impl RelayStage {
    pub fn new(registry: Arc<BroadcastRegistry>, join_notice: JoinNotice, announce_first_join: bool) -> Self {
        Self { registry, join_notice, announce_first_join }
    }

    fn join(&self, ctx: &StageContext<'_>) {
        let connection = Arc::clone(ctx.connection());
        let id = connection.id();

        match self.join_notice {
            JoinNotice::Disabled => {
                self.registry.add(connection);
            }
            JoinNotice::ExistingMembers => {
                if self.announce_first_join || !self.registry.is_empty() {
                    self.registry.broadcast(&Message::joined(id).into_shared());
                }
                self.registry.add(connection);
            }
            JoinNotice::AllMembers => {
                self.registry.add(connection);
                if self.announce_first_join || self.registry.len() > 1 {
                    self.registry.broadcast(&Message::joined(id).into_shared());
                }
            }
        }
    }
}

impl Stage for RelayStage {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        match msg {
            Inbound::Frame(frame) if frame.opcode() == OpCode::Text => {
                let message = Message::text(ctx.connection().id(), frame.as_text()?);
                trace!(conn = %ctx.connection().id(), len = message.payload().len(), "relaying message");
                self.registry.broadcast(&message.into_shared());
                Ok(())
            }
            msg => {
                ctx.fire_read(msg);
                Ok(())
            }
        }
    }

    fn handle_event(&mut self, ctx: &mut StageContext<'_>, event: LifecycleEvent) -> Result<(), RelayError> {
        match &event {
            LifecycleEvent::HandshakeComplete(_) => {
                // plain HTTP is over for this connection
                ctx.remove_stage(ROUTER);
                self.join(ctx);
            }
            LifecycleEvent::Closed => {
                if self.registry.remove(ctx.connection().id()) {
                    debug!(conn = %ctx.connection().id(), "deregistered closed connection");
                }
            }
            _ => {}
        }
        ctx.fire_event(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SharedMessage;
    use crate::pipeline::testing::{Log, Recorder, RecordingTransport, test_handle};
    use crate::pipeline::{HandshakeComplete, Pipeline};
    use crate::ws::Frame;
    use http::{HeaderMap, Uri};
    use tokio::sync::mpsc;

    struct Member {
        pipeline: Pipeline<RecordingTransport>,
        rx: mpsc::Receiver<SharedMessage>,
    }

    impl Member {
        fn new(registry: &Arc<BroadcastRegistry>, join_notice: JoinNotice, announce_first_join: bool, log: &Log) -> Self {
            let (handle, rx) = test_handle();
            let mut pipeline = Pipeline::new(handle, RecordingTransport::default());
            pipeline.add_last(ROUTER, Recorder::new("router", log)).unwrap();
            pipeline.add_last("relay", RelayStage::new(Arc::clone(registry), join_notice, announce_first_join)).unwrap();
            Self { pipeline, rx }
        }

        fn upgrade(&mut self) {
            let handshake = HandshakeComplete { uri: Uri::from_static("/ws"), headers: HeaderMap::new() };
            self.pipeline.fire_event(LifecycleEvent::HandshakeComplete(handshake));
        }

        fn received(&mut self) -> Vec<String> {
            let mut texts = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                texts.push(message.as_str().to_owned());
            }
            texts
        }

        fn id(&self) -> String {
            self.pipeline.connection().id().to_string()
        }
    }

    #[test]
    fn handshake_registers_and_drops_the_router() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::Disabled, true, &log);

        a.upgrade();

        assert!(registry.contains(a.pipeline.connection().id()));
        assert_eq!(a.pipeline.names(), ["relay"]);
        assert!(a.received().is_empty());
    }

    #[test]
    fn text_is_relayed_to_everyone_including_the_sender() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::Disabled, true, &log);
        let mut b = Member::new(&registry, JoinNotice::Disabled, true, &log);
        a.upgrade();
        b.upgrade();

        a.pipeline.fire_read(Inbound::Frame(Frame::text("hello")));

        assert_eq!(a.received(), ["hello"]);
        assert_eq!(b.received(), ["hello"]);
    }

    #[test]
    fn all_members_notice_reaches_the_joiner_too() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::AllMembers, true, &log);
        let mut b = Member::new(&registry, JoinNotice::AllMembers, true, &log);

        a.upgrade();
        b.upgrade();

        let a_joined = format!("Client {} joined", a.id());
        let b_joined = format!("Client {} joined", b.id());
        assert_eq!(a.received(), [a_joined, b_joined.clone()]);
        assert_eq!(b.received(), [b_joined]);
    }

    #[test]
    fn existing_members_notice_skips_the_joiner() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::ExistingMembers, true, &log);
        let mut b = Member::new(&registry, JoinNotice::ExistingMembers, true, &log);

        a.upgrade();
        b.upgrade();

        assert_eq!(a.received(), [format!("Client {} joined", b.id())]);
        assert!(b.received().is_empty());
    }

    #[test]
    fn first_join_can_stay_silent() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::AllMembers, false, &log);
        let mut b = Member::new(&registry, JoinNotice::AllMembers, false, &log);

        a.upgrade();
        assert!(a.received().is_empty());

        b.upgrade();
        assert_eq!(a.received(), [format!("Client {} joined", b.id())]);
        assert_eq!(b.received(), [format!("Client {} joined", b.id())]);
    }

    #[test]
    fn close_deregisters() {
        let registry = Arc::new(BroadcastRegistry::new());
        let log = Log::default();
        let mut a = Member::new(&registry, JoinNotice::Disabled, true, &log);
        let mut b = Member::new(&registry, JoinNotice::Disabled, true, &log);
        a.upgrade();
        b.upgrade();

        a.pipeline.fire_event(LifecycleEvent::Closed);
        b.pipeline.fire_read(Inbound::Frame(Frame::text("anyone?")));

        assert_eq!(registry.members(), [b.pipeline.connection().id()]);
        assert!(a.received().is_empty());
        assert_eq!(b.received(), ["anyone?"]);

        // closing again, or without ever joining, is harmless
        a.pipeline.fire_event(LifecycleEvent::Closed);
        let mut c = Member::new(&registry, JoinNotice::Disabled, true, &log);
        c.pipeline.fire_event(LifecycleEvent::Closed);
        assert_eq!(registry.len(), 1);
    }
}
