//! Response head type.
//!
//! A response travels through the pipeline as its head first, followed by
//! payload items, so the head is a plain `http::Response<()>`.

use http::Response;

/// The status line and headers of a response, with no body attached.
pub type ResponseHead = Response<()>;
