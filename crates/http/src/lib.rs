//! HTTP/1.1 wire codec for the micro relay.
//!
//! This crate turns raw connection bytes into requests and responses into raw
//! bytes. It knows nothing about sockets or tasks: every type is a
//! [`tokio_util::codec::Decoder`] or [`tokio_util::codec::Encoder`] over a
//! [`bytes::BytesMut`], so the caller decides when bytes arrive and where encoded
//! bytes go.
//!
//! # Modules
//!
//! - [`protocol`]: request heads, payload framing, aggregated requests and the
//!   error types
//! - [`codec`]: the decoders and encoders
//!
//! # Limits
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - header block of at most [`codec::MAX_HEADER_BYTES`] bytes and
//!   [`codec::MAX_HEADER_NUM`] headers
//! - aggregated bodies capped by [`codec::RequestAggregator::max_body_size`]

pub mod codec;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
