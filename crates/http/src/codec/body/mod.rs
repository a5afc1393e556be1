//! Body framing: `Content-Length` and chunked, in both directions.
//!
//! - [`PayloadDecoder`] picks [`ChunkedDecoder`](chunked_decoder::ChunkedDecoder) or
//!   [`LengthDecoder`](length_decoder::LengthDecoder) from the request's framing
//! - [`PayloadEncoder`] does the same for response bodies

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
