use std::io;

use relay_http::protocol::{ParseError, SendError};
use thiserror::Error;

use crate::buffer::BufferError;
use crate::ws::FrameError;

/// Everything that can go wrong on one connection.
///
/// Only [`RelayError::ResourceNotFound`] leaves the connection usable; the
/// rest end it.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("malformed request: {source}")]
    Http { source: ParseError },

    #[error("request too large: {source}")]
    RequestTooLarge { source: ParseError },

    #[error("malformed frame: {source}")]
    Frame {
        #[from]
        source: FrameError,
    },

    #[error("resource not found: {path}")]
    ResourceNotFound { path: String },

    #[error("buffer error: {source}")]
    Buffer {
        #[from]
        source: BufferError,
    },

    #[error("failed to encode response: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("pipeline error: {reason}")]
    Pipeline { reason: String },
}

impl RelayError {
    pub fn protocol<S: ToString>(reason: S) -> Self {
        Self::Protocol { reason: reason.to_string() }
    }

    pub fn not_found<S: ToString>(path: S) -> Self {
        Self::ResourceNotFound { path: path.to_string() }
    }

    pub fn pipeline<S: ToString>(reason: S) -> Self {
        Self::Pipeline { reason: reason.to_string() }
    }

    /// Whether the connection has to be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RelayError::ResourceNotFound { .. })
    }

    /// Malformed HTTP or frames, from this peer.
    pub fn is_protocol(&self) -> bool {
        matches!(self, RelayError::Protocol { .. } | RelayError::Http { .. } | RelayError::Frame { .. })
    }
}

impl From<ParseError> for RelayError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Io { source } => Self::Transport { source },
            e if e.is_too_large() => Self::RequestTooLarge { source: e },
            e => Self::Http { source: e },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_classified() {
        assert!(matches!(RelayError::from(ParseError::too_large_body(10, 5)), RelayError::RequestTooLarge { .. }));
        assert!(matches!(RelayError::from(ParseError::InvalidMethod), RelayError::Http { .. }));
        assert!(RelayError::from(ParseError::InvalidUri).is_protocol());
    }

    #[test]
    fn only_not_found_is_recoverable() {
        assert!(!RelayError::not_found("/missing.html").is_fatal());
        assert!(RelayError::protocol("bad frame").is_fatal());
        assert!(RelayError::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
    }
}
