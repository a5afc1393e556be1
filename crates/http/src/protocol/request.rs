//! Request header handling.
//!
//! [`RequestHeader`] wraps `http::Request<()>` and adds the connection-level
//! questions the relay asks of every request: does it want the connection kept
//! alive, does it expect a `100 Continue`, is it asking for a protocol upgrade.

use http::header::{CONNECTION, EXPECT, UPGRADE};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version};

/// The method, target, version and headers of a request.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, producing a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// Whether a body may follow the header, judged by the method alone.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Persistent-connection semantics of the request.
    ///
    /// HTTP/1.1 keeps the connection unless `Connection: close` is present,
    /// HTTP/1.0 only keeps it with an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.version() {
            Version::HTTP_11 => !self.has_connection_token("close"),
            Version::HTTP_10 => self.has_connection_token("keep-alive"),
            _ => false,
        }
    }

    /// Whether the client sent `Expect: 100-continue`.
    pub fn expects_continue(&self) -> bool {
        self.headers().get(EXPECT).is_some_and(is_100_continue)
    }

    /// Removes a `100-continue` expectation, returning whether one was present.
    pub fn take_expect_continue(&mut self) -> bool {
        if self.expects_continue() {
            self.headers_mut().remove(EXPECT);
            true
        } else {
            false
        }
    }

    /// Whether the request asks to switch protocols (`Connection: upgrade`
    /// together with an `Upgrade` header).
    pub fn is_upgrade(&self) -> bool {
        self.headers().contains_key(UPGRADE) && self.has_connection_token("upgrade")
    }

    /// Checks the comma separated `Connection` header values for `token`,
    /// ignoring ASCII case.
    pub fn has_connection_token(&self, token: &str) -> bool {
        self.headers()
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }
}

fn is_100_continue(value: &HeaderValue) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 4 && bytes[..4].eq_ignore_ascii_case(b"100-")
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, headers: &[(&str, &str)]) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestHeader::from(builder.body(()).unwrap())
    }

    #[test]
    fn keep_alive_defaults_follow_version() {
        assert!(header(Version::HTTP_11, &[]).is_keep_alive());
        assert!(!header(Version::HTTP_10, &[]).is_keep_alive());
        assert!(!header(Version::HTTP_11, &[("Connection", "close")]).is_keep_alive());
        assert!(header(Version::HTTP_10, &[("Connection", "Keep-Alive")]).is_keep_alive());
    }

    #[test]
    fn expect_continue_is_taken_once() {
        let mut header = header(Version::HTTP_11, &[("Expect", "100-Continue")]);
        assert!(header.expects_continue());
        assert!(header.take_expect_continue());
        assert!(!header.take_expect_continue());
        assert!(header.headers().get(EXPECT).is_none());
    }

    #[test]
    fn upgrade_needs_both_headers() {
        assert!(header(Version::HTTP_11, &[("Connection", "keep-alive, Upgrade"), ("Upgrade", "websocket")]).is_upgrade());
        assert!(!header(Version::HTTP_11, &[("Upgrade", "websocket")]).is_upgrade());
        assert!(!header(Version::HTTP_11, &[("Connection", "upgrade")]).is_upgrade());
    }
}
