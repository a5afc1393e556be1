//! Opening handshake, server side.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{CONNECTION, CONTENT_LENGTH, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderValue, Method, Response, StatusCode};
use relay_http::protocol::{RequestHeader, ResponseHead};
use sha1::{Digest, Sha1};
use thiserror::Error;

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const WEBSOCKET_VERSION: HeaderValue = HeaderValue::from_static("13");

/// Why an upgrade request was turned down.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRejection {
    #[error("upgrade request must use GET")]
    NotGet,

    #[error("missing `Upgrade: websocket`")]
    MissingUpgrade,

    #[error("missing `Connection: upgrade`")]
    MissingConnectionUpgrade,

    #[error("unsupported websocket version")]
    UnsupportedVersion,

    #[error("missing or malformed Sec-WebSocket-Key")]
    InvalidKey,
}

impl HandshakeRejection {
    pub fn status(self) -> StatusCode {
        match self {
            HandshakeRejection::UnsupportedVersion => StatusCode::UPGRADE_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Checks an upgrade request and returns its `Sec-WebSocket-Key`.
pub fn validate(header: &RequestHeader) -> Result<&HeaderValue, HandshakeRejection> {
    if header.method() != Method::GET {
        return Err(HandshakeRejection::NotGet);
    }

    let upgrades_to_websocket = header
        .headers()
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("websocket")));
    if !upgrades_to_websocket {
        return Err(HandshakeRejection::MissingUpgrade);
    }

    if !header.has_connection_token("upgrade") {
        return Err(HandshakeRejection::MissingConnectionUpgrade);
    }

    if header.headers().get(SEC_WEBSOCKET_VERSION) != Some(&WEBSOCKET_VERSION) {
        return Err(HandshakeRejection::UnsupportedVersion);
    }

    let key = header.headers().get(SEC_WEBSOCKET_KEY).ok_or(HandshakeRejection::InvalidKey)?;
    match STANDARD.decode(key.as_bytes()) {
        Ok(nonce) if nonce.len() == 16 => Ok(key),
        _ => Err(HandshakeRejection::InvalidKey),
    }
}

/// `base64(SHA-1(key + GUID))`
pub fn accept_key(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(GUID);
    STANDARD.encode(hasher.finalize())
}

/// The `101 Switching Protocols` response for a validated key.
pub fn accept_response(key: &HeaderValue) -> ResponseHead {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    // base64 output is always a valid header value
    if let Ok(accept) = HeaderValue::try_from(accept_key(key.as_bytes())) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    response
}

/// An empty error response; a version mismatch also names the version we speak.
pub fn rejection_response(rejection: HandshakeRejection) -> ResponseHead {
    let mut response = Response::new(());
    *response.status_mut() = rejection.status();
    response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    if rejection == HandshakeRejection::UnsupportedVersion {
        response.headers_mut().insert(SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn upgrade_request(edit: impl FnOnce(http::request::Builder) -> http::request::Builder) -> RequestHeader {
        let builder = Request::builder()
            .method(Method::GET)
            .uri("/ws")
            .header("Host", "server.example.com")
            .header("Upgrade", "websocket")
            .header("Connection", "keep-alive, Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13");
        RequestHeader::from(edit(builder).body(()).unwrap())
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_request_yields_accept_response() {
        let header = upgrade_request(|b| b);
        let key = validate(&header).unwrap();
        let response = accept_response(key);

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[SEC_WEBSOCKET_ACCEPT], "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(response.headers()[UPGRADE], "websocket");
    }

    #[test]
    fn wrong_version_asks_for_13() {
        let mut header = upgrade_request(|b| b);
        header.headers_mut().insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));

        let rejection = validate(&header).unwrap_err();
        assert_eq!(rejection, HandshakeRejection::UnsupportedVersion);

        let response = rejection_response(rejection);
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(response.headers()[SEC_WEBSOCKET_VERSION], "13");
    }

    #[test]
    fn malformed_requests_are_bad_requests() {
        let mut short_key = upgrade_request(|b| b);
        short_key.headers_mut().insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static("c2hvcnQ="));
        assert_eq!(validate(&short_key), Err(HandshakeRejection::InvalidKey));

        let mut no_upgrade = upgrade_request(|b| b);
        no_upgrade.headers_mut().remove(UPGRADE);
        assert_eq!(validate(&no_upgrade), Err(HandshakeRejection::MissingUpgrade));

        let post = upgrade_request(|b| b.method(Method::POST));
        assert_eq!(validate(&post), Err(HandshakeRejection::NotGet));
        assert_eq!(HandshakeRejection::NotGet.status(), StatusCode::BAD_REQUEST);
    }
}
