//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`] parses a request head and picks the body framing
//! - [`HeaderEncoder`] writes a response head with framing headers that match its payload

mod header_decoder;
mod header_encoder;

pub use header_decoder::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use header_encoder::HeaderEncoder;
