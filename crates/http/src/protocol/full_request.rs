//! A request whose body has been fully aggregated.

use bytes::Bytes;

use crate::protocol::RequestHeader;

/// A complete request: header plus the whole body.
///
/// The body type defaults to [`Bytes`]; pipeline layers that manage their own
/// buffers swap it with [`FullRequest::map_body`].
#[derive(Debug)]
pub struct FullRequest<B = Bytes> {
    header: RequestHeader,
    body: B,
}

impl<B> FullRequest<B> {
    pub fn new(header: RequestHeader, body: B) -> Self {
        Self { header, body }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RequestHeader {
        &mut self.header
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_parts(self) -> (RequestHeader, B) {
        (self.header, self.body)
    }

    pub fn map_body<F, T>(self, f: F) -> FullRequest<T>
    where
        F: FnOnce(B) -> T,
    {
        FullRequest { header: self.header, body: f(self.body) }
    }
}
