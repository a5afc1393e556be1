//! Request header decoding.
//!
//! Parsing is done by `httparse` directly over the receive buffer. Rather than
//! copying every name and value, the decoder records the byte range of each one,
//! splits the header block off the buffer as a frozen `Bytes` and builds the
//! `HeaderValue`s as slices of it.
//!
//! # Limits
//!
//! - at most [`MAX_HEADER_NUM`] headers
//! - at most [`MAX_HEADER_BYTES`] bytes for the whole header block
//! - HTTP/1.0 and HTTP/1.1 only

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest possible request line plus terminator: `GET / HTTP/1.1\r\n\r\n`
const MIN_REQUEST_BYTES: usize = 18;

/// Decodes a request head and tells how its body is framed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    /// Returns `Ok(None)` until a whole header block is buffered. On success the
    /// header block is consumed from `src`; body bytes are left in place.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, "parsed request header");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            other => return Err(ParseError::InvalidVersion(other)),
        };

        let header_count = req.headers.len();
        let mut header_index = [HeaderIndex::EMPTY; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        // `req` borrows `src`, so it has to be finished with before the split
        let header_bytes = src.split_to(body_offset).freeze();

        let header_map = builder.headers_mut().ok_or(ParseError::InvalidUri)?;
        header_map.reserve(header_count);
        for index in &header_index[..header_count] {
            let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1))
                .map_err(ParseError::invalid_header)?;
            header_map.append(name, value);
        }

        let header = RequestHeader::from(builder.body(()).map_err(ParseError::invalid_header)?);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

/// Byte ranges of one header's name and value inside the receive buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Picks the body framing from `Transfer-Encoding` and `Content-Length`,
/// following RFC 9112 section 6.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::new_chunked())
            } else {
                Err(ParseError::invalid_header("transfer-encoding without a final chunked coding"))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_e| ParseError::invalid_content_length("value can't to_str"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_e| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            Ok(PayloadSize::new_length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// Chunked has to be the last coding listed for the body to be chunk framed.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(&HeaderValue::from_static("gzip, chunked")));
        assert!(is_chunked(&HeaderValue::from_static("Chunked")));
        assert!(!is_chunked(&HeaderValue::from_static("chunked, gzip")));
        assert!(!is_chunked(&HeaderValue::from_static("gzip")));
    }

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let str = indoc! {r##"
        POST /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##};

        let mut bytes = BytesMut::from(str);
        let (_, payload_size) = HeaderDecoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert!(buf.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.path(), "/index.html");
        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
    }

    #[test]
    fn websocket_upgrade_request() {
        let str = indoc! {r##"
        GET /ws?room=1 HTTP/1.1
        Host: server.example.com
        Upgrade: websocket
        Connection: Upgrade
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
        Sec-WebSocket-Version: 13

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.path(), "/ws");
        assert_eq!(header.uri().query(), Some("room=1"));
        assert!(header.is_upgrade());
    }

    #[test]
    fn partial_header_waits_for_more() {
        let input = "GET /index.html HTTP/1.1\r\nHost: 127.0.0.1\r\n";
        let mut buf = BytesMut::from(input);
        assert!(HeaderDecoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), input.len());
    }

    #[test]
    fn oversized_partial_header_is_rejected() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nX-Filler: ");
        buf.extend_from_slice(&vec![b'a'; MAX_HEADER_BYTES]);

        let err = HeaderDecoder.decode(&mut buf).unwrap_err();
        assert!(err.is_too_large());
    }

    #[test]
    fn conflicting_length_headers_are_rejected() {
        let str = indoc! {r##"
        POST / HTTP/1.1
        Content-Length: 3
        Transfer-Encoding: chunked

        "##};

        let mut buf = BytesMut::from(str);
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn http_09_is_rejected() {
        let mut buf = BytesMut::from("GET / HTTP/2.0\r\nHost: a\r\n\r\n");
        assert!(HeaderDecoder.decode(&mut buf).is_err());
    }
}
