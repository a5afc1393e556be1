//! Routes complete requests: the upgrade path moves on to the handshake, any
//! other path is answered from the static resources.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE};
use http::{HeaderValue, Method, Response, StatusCode};
use relay_http::protocol::{PayloadItem, PayloadSize, RequestHeader, ResponseHead};
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::date::http_date;
use crate::error::RelayError;
use crate::pipeline::{Inbound, Outbound, Stage, StageContext};
use crate::resource::ResourceLoader;

/// Size of each copied piece when a resource can't go out as one region.
pub const COPY_CHUNK_SIZE: usize = 8 * 1024;

const KEEP_ALIVE: HeaderValue = HeaderValue::from_static("keep-alive");
const CLOSE: HeaderValue = HeaderValue::from_static("close");

pub struct RouterStage {
    upgrade_path: String,
    index_file: String,
    resources: Arc<dyn ResourceLoader>,
}

impl RouterStage {
    pub fn new(upgrade_path: impl Into<String>, index_file: impl Into<String>, resources: Arc<dyn ResourceLoader>) -> Self {
        Self { upgrade_path: upgrade_path.into(), index_file: index_file.into(), resources }
    }

    fn serve(&self, ctx: &mut StageContext<'_>, header: &RequestHeader) -> Result<(), RelayError> {
        let keep_alive = header.is_keep_alive();

        // the codec answers expectations on requests with a body, this covers the rest
        if header.expects_continue() {
            let mut head = Response::new(());
            *head.status_mut() = StatusCode::CONTINUE;
            ctx.write_and_flush(Outbound::Response(head, PayloadSize::Empty));
        }

        let path = match header.path() {
            "/" => self.index_file.as_str(),
            path => path.trim_start_matches('/'),
        };

        match self.resources.load(path) {
            Ok(content) => send_resource(ctx, header, path, content, keep_alive),
            Err(e) if !e.is_fatal() => {
                debug!(conn = %ctx.connection().id(), path, "resource not found");
                send_not_found(ctx, header, keep_alive);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Stage for RouterStage {
    fn handle_read(&mut self, ctx: &mut StageContext<'_>, msg: Inbound) -> Result<(), RelayError> {
        match msg {
            Inbound::Request(request) if request.header().path().eq_ignore_ascii_case(&self.upgrade_path) => {
                trace!(conn = %ctx.connection().id(), "request for the upgrade path");
                ctx.fire_read(Inbound::Request(request));
                Ok(())
            }
            // the request body is released here, nothing below reads it
            Inbound::Request(request) => self.serve(ctx, request.header()),
            msg => {
                ctx.fire_read(msg);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RouterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterStage")
            .field("upgrade_path", &self.upgrade_path)
            .field("index_file", &self.index_file)
            .finish_non_exhaustive()
    }
}

fn send_resource(
    ctx: &mut StageContext<'_>,
    header: &RequestHeader,
    path: &str,
    content: Buffer,
    keep_alive: bool,
) -> Result<(), RelayError> {
    let body = content.into_bytes()?;
    let length = body.len() as u64;
    let head_only = header.method() == Method::HEAD;

    let mut head = response_head(header, StatusCode::OK, keep_alive);
    let headers = head.headers_mut();
    headers.insert(CONTENT_TYPE, content_type(path));
    headers.insert(CONTENT_LENGTH, length.into());

    let payload_size = if head_only { PayloadSize::Empty } else { PayloadSize::new_length(length) };
    ctx.write(Outbound::Response(head, payload_size));

    if !payload_size.is_empty() {
        if ctx.has_byte_transformer() {
            for chunk in body.chunks(COPY_CHUNK_SIZE) {
                ctx.write(Outbound::Payload(PayloadItem::Chunk(Bytes::copy_from_slice(chunk))));
            }
        } else {
            ctx.write(Outbound::Region(body));
        }
        ctx.write(Outbound::Payload(PayloadItem::Eof));
    }

    ctx.flush();
    if !keep_alive {
        ctx.close();
    }
    Ok(())
}

fn send_not_found(ctx: &mut StageContext<'_>, header: &RequestHeader, keep_alive: bool) {
    let mut head = response_head(header, StatusCode::NOT_FOUND, keep_alive);
    head.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

    ctx.write_and_flush(Outbound::Response(head, PayloadSize::Empty));
    if !keep_alive {
        ctx.close();
    }
}

fn response_head(header: &RequestHeader, status: StatusCode, keep_alive: bool) -> ResponseHead {
    let mut head = Response::new(());
    *head.status_mut() = status;
    *head.version_mut() = header.version();

    let headers = head.headers_mut();
    headers.insert(DATE, http_date());
    headers.insert(CONNECTION, if keep_alive { KEEP_ALIVE } else { CLOSE });
    head
}

fn content_type(path: &str) -> HeaderValue {
    let extension = Path::new(path).extension().and_then(|ext| ext.to_str()).unwrap_or_default().to_ascii_lowercase();
    let mime = match extension.as_str() {
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "css" => mime::TEXT_CSS_UTF_8,
        "js" => mime::APPLICATION_JAVASCRIPT_UTF_8,
        "json" => mime::APPLICATION_JSON,
        "txt" => mime::TEXT_PLAIN_UTF_8,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "svg" => mime::IMAGE_SVG,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    HeaderValue::from_str(mime.as_ref()).unwrap_or(HeaderValue::from_static("application/octet-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{Log, Recorder, RecordingTransport, test_pipeline};
    use crate::pipeline::{Pipeline, Position};
    use crate::resource::MockResourceLoader;
    use crate::stages::HttpCodecStage;
    use mockall::predicate;

    const PAGE: &[u8] = b"<h1>chat</h1>";

    fn loader() -> Arc<dyn ResourceLoader> {
        let mut loader = MockResourceLoader::new();
        loader
            .expect_load()
            .with(predicate::function(|path: &str| path == "index.html"))
            .returning(|_| Ok(Buffer::copy_from_slice(PAGE)));
        loader.expect_load().returning(|path| Err(RelayError::not_found(path)));
        Arc::new(loader)
    }

    fn pipeline(log: &Log) -> Pipeline<RecordingTransport> {
        let mut pipeline = test_pipeline();
        pipeline.add_last("http-codec", HttpCodecStage::new(1024)).unwrap();
        pipeline.add_last("router", RouterStage::new("/ws", "index.html", loader())).unwrap();
        pipeline.add_last("next", Recorder::new("next", log)).unwrap();
        pipeline
    }

    fn feed(pipeline: &mut Pipeline<RecordingTransport>, input: &str) {
        let input = input.replace('\n', "\r\n");
        pipeline.fire_read(Inbound::Bytes(Buffer::copy_from_slice(input.as_bytes())));
    }

    #[test]
    fn index_is_served_with_keep_alive() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET / HTTP/1.1\nHost: x\n\n");

        let written = pipeline.transport().written_str();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.contains("content-type: text/html; charset=utf-8\r\n"));
        assert!(written.contains("content-length: 13\r\n"));
        assert!(written.contains("connection: keep-alive\r\n"));
        assert!(written.contains("date: "));
        assert!(written.ends_with("\r\n\r\n<h1>chat</h1>"));
        assert_eq!(pipeline.transport().regions(), 1);
        assert!(!pipeline.transport().is_closed());
        assert!(log.entries().is_empty());
    }

    #[test]
    fn connection_close_is_honoured() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET / HTTP/1.1\nConnection: close\n\n");

        assert!(pipeline.transport().written_str().contains("connection: close\r\n"));
        assert!(pipeline.transport().is_closed());
    }

    #[test]
    fn http_10_closes_by_default() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /index.html HTTP/1.0\n\n");

        assert!(pipeline.transport().written_str().ends_with("<h1>chat</h1>"));
        assert!(pipeline.transport().is_closed());
    }

    #[test]
    fn missing_resource_is_404_and_keeps_the_connection() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /missing.css HTTP/1.1\n\n");

        let written = pipeline.transport().written_str();
        assert!(written.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(written.contains("content-length: 0\r\n"));
        assert!(!pipeline.transport().is_closed());

        pipeline.transport().clear();
        feed(&mut pipeline, "GET / HTTP/1.1\n\n");
        assert!(pipeline.transport().written_str().starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn head_gets_headers_only() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "HEAD / HTTP/1.1\n\n");

        let written = pipeline.transport().written_str();
        assert!(written.contains("content-length: 13\r\n"));
        assert!(written.ends_with("\r\n\r\n"));
        assert_eq!(pipeline.transport().regions(), 0);
    }

    #[test]
    fn upgrade_path_is_forwarded_ignoring_case() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);

        feed(&mut pipeline, "GET /WS HTTP/1.1\n\n");

        assert_eq!(log.entries(), ["next:read:/WS"]);
        assert!(pipeline.transport().writes().is_empty());
    }

    struct Scrambler;

    impl Stage for Scrambler {
        fn transforms_bytes(&self) -> bool {
            true
        }
    }

    #[test]
    fn byte_transformer_forces_copied_chunks() {
        let log = Log::default();
        let mut pipeline = pipeline(&log);
        pipeline.add("tls", Scrambler, Position::First).unwrap();

        feed(&mut pipeline, "GET / HTTP/1.1\n\n");

        assert_eq!(pipeline.transport().regions(), 0);
        assert!(pipeline.transport().written_str().ends_with("\r\n\r\n<h1>chat</h1>"));
    }

    #[test]
    fn content_types_follow_the_extension() {
        assert_eq!(content_type("a/chat.JS"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("style.css"), "text/css; charset=utf-8");
        assert_eq!(content_type("blob"), "application/octet-stream");
    }
}
