//! Streaming HTTP/1.1 codecs built on `tokio_util::codec`.
//!
//! - [`RequestDecoder`]: request head followed by body items
//! - [`RequestAggregator`]: whole requests, body buffered up to a size cap
//! - [`ResponseEncoder`]: response head followed by body items, framed by
//!   `Content-Length` or chunked encoding
//!
//! ```
//! use bytes::BytesMut;
//! use relay_http::codec::{Aggregated, RequestAggregator};
//! use tokio_util::codec::Decoder;
//!
//! let mut aggregator = RequestAggregator::new(64 * 1024);
//! let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let Some(Aggregated::Request(request)) = aggregator.decode(&mut buf).unwrap() else { unreachable!() };
//! assert_eq!(request.header().path(), "/");
//! ```

mod aggregator;
mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use aggregator::{Aggregated, RequestAggregator};
pub use header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
