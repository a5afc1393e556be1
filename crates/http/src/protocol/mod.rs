//! Protocol types shared by the decoders, the encoders and the relay pipeline.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: a message streamed as a head
//!   followed by payload items
//! - [`RequestHeader`]: a decoded request head
//! - [`FullRequest`]: a request with its whole body aggregated
//! - [`ResponseHead`]: a response head waiting for its payload
//! - [`ParseError`], [`SendError`]: decode and encode failures

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod full_request;
pub use full_request::FullRequest;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::ParseError;
pub use error::SendError;
