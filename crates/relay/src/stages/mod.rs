//! The stages a relay connection is built from, in pipeline order.
//!
//! | name          | stage                 | role                                   |
//! |---------------|-----------------------|----------------------------------------|
//! | `http-codec`  | [`HttpCodecStage`]    | bytes ↔ requests and responses         |
//! | `frame-codec` | [`FrameCodecStage`]   | replaces `http-codec` after an upgrade |
//! | `router`      | [`RouterStage`]       | static resources; gone after upgrade   |
//! | `upgrade`     | [`UpgradeStage`]      | handshake and control frames           |
//! | `relay`       | [`RelayStage`]        | registry membership and fan-out        |
//! | `errors`      | [`ErrorHandlerStage`] | closes on fatal errors                 |

mod error_handler;
mod frame_codec;
mod http_codec;
mod relay;
mod router;
mod upgrade;

pub use error_handler::ErrorHandlerStage;
pub use frame_codec::FrameCodecStage;
pub use http_codec::HttpCodecStage;
pub use relay::RelayStage;
pub use router::{COPY_CHUNK_SIZE, RouterStage};
pub use upgrade::UpgradeStage;

pub const HTTP_CODEC: &str = "http-codec";
pub const FRAME_CODEC: &str = "frame-codec";
pub const ROUTER: &str = "router";
pub const UPGRADE: &str = "upgrade";
pub const RELAY: &str = "relay";
pub const ERRORS: &str = "errors";
