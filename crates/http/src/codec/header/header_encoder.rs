//! Response head serialization.
//!
//! Writes the status line and header block, and makes the framing headers agree
//! with the [`PayloadSize`] the response is sent with.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, StatusCode, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
const ZERO: HeaderValue = HeaderValue::from_static("0");

/// Encoder for response heads.
///
/// `Content-Length` or `Transfer-Encoding` is inserted (or overwritten) from the
/// payload size, except for `1xx` and `204` responses which must carry neither.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut header, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match header.version() {
            // the status line always carries the highest version we speak
            Version::HTTP_11 | Version::HTTP_10 => {
                let status = header.status();
                write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        if has_framing(header.status()) {
            let headers = header.headers_mut();
            match payload_size {
                PayloadSize::Length(n) => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, n.into());
                }
                PayloadSize::Chunked => {
                    headers.remove(header::CONTENT_LENGTH);
                    headers.insert(header::TRANSFER_ENCODING, CHUNKED);
                }
                PayloadSize::Empty => {
                    headers.remove(header::TRANSFER_ENCODING);
                    // an explicit length survives, it is how HEAD responses describe the body
                    if !headers.contains_key(header::CONTENT_LENGTH) {
                        headers.insert(header::CONTENT_LENGTH, ZERO);
                    }
                }
            }
        } else {
            header.headers_mut().remove(header::CONTENT_LENGTH);
            header.headers_mut().remove(header::TRANSFER_ENCODING);
        }

        for (header_name, header_value) in header.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Informational and `204 No Content` responses never describe a body.
fn has_framing(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT)
}

/// `io::Write` over a `BytesMut` that has already reserved room.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn content_length_is_set_from_payload() {
        let head = Response::builder().status(StatusCode::OK).header("Content-Type", "text/html").body(()).unwrap();
        let text = encode(head, PayloadSize::Length(12));

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn stale_content_length_is_replaced() {
        let head = Response::builder().status(StatusCode::OK).header("Content-Length", "99").body(()).unwrap();
        let text = encode(head, PayloadSize::Chunked);

        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn head_response_keeps_explicit_length() {
        let head = Response::builder().status(StatusCode::OK).header("Content-Length", "42").body(()).unwrap();
        let text = encode(head, PayloadSize::Empty);
        assert!(text.contains("content-length: 42\r\n"));

        let head = Response::builder().status(StatusCode::NOT_FOUND).body(()).unwrap();
        assert!(encode(head, PayloadSize::Empty).contains("content-length: 0\r\n"));
    }

    #[test]
    fn informational_has_no_framing() {
        let head = Response::builder().status(StatusCode::CONTINUE).body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.1 100 Continue\r\n\r\n");

        let head = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS).header("Upgrade", "websocket").body(()).unwrap();
        let text = encode(head, PayloadSize::Empty);
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(!text.contains("content-length"));
    }
}
