//! Outgoing HTTP response: the sink handlers write into.
//!
//! A [`Response`] starts with no status, no headers and an empty body. The
//! dispatcher inspects whether a status was ever set: a request that finishes
//! without one is answered `200 OK`, a failed one `500`.

use std::fmt;
use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;

use crate::error::{Error, Result};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types the built-in responders emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Css,          // text/css; charset=utf-8
    Csv,          // text/csv; charset=utf-8
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    Javascript,   // text/javascript; charset=utf-8
    Jpeg,         // image/jpeg
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Pdf,          // application/pdf
    Png,          // image/png
    Prometheus,   // text/plain; version=0.0.4
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Wasm,         // application/wasm
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Csv         => "text/csv; charset=utf-8",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::Javascript  => "text/javascript; charset=utf-8",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Prometheus  => "text/plain; version=0.0.4",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Wasm        => "application/wasm",
            Self::Xml         => "application/xml",
        }
    }

    /// Guesses from the file extension, case-insensitively. Unknown or
    /// missing extensions are `OctetStream`.
    pub fn from_path(path: &Path) -> Self {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "css"          => Self::Css,
            "csv"          => Self::Csv,
            "gif"          => Self::Gif,
            "htm" | "html" => Self::Html,
            "js" | "mjs"   => Self::Javascript,
            "jpeg" | "jpg" => Self::Jpeg,
            "json"         => Self::Json,
            "pdf"          => Self::Pdf,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "wasm"         => Self::Wasm,
            "xml"          => Self::Xml,
            _              => Self::OctetStream,
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// Streaming body source. Each item is one chunk on the wire.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

pub(crate) type HyperBody = BoxBody<Bytes, std::io::Error>;

#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl Body {
    /// Buffered bytes; empty for `Empty` and for streams.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Full(bytes) => bytes,
            Self::Empty | Self::Stream(_) => &[],
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Body,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// The status that will be sent. `200 OK` when none was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// The status a handler explicitly set, if any.
    pub fn explicit_status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replaces any existing value for `name`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.to_owned()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidHeader(name.to_owned()))?;
        self.headers.insert(header_name, value);
        Ok(())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Body::Full(body.into());
    }

    /// Sends `stream` as the body, chunk by chunk, without buffering it.
    pub fn set_body_stream<S>(&mut self, stream: S)
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
    {
        self.body = Body::Stream(Box::pin(stream));
    }

    pub(crate) fn set_content(&mut self, status: StatusCode, content_type: ContentType, body: Bytes) {
        self.status = Some(status);
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        self.body = Body::Full(body);
    }

    /// `{"error": message}` with the given status.
    pub(crate) fn set_error(&mut self, status: StatusCode, message: &str) {
        let body = serde_json::to_vec(&ErrorBody { error: message }).unwrap_or_default();
        self.set_content(status, ContentType::Json, Bytes::from(body));
    }

    pub(crate) fn into_hyper(self) -> http::Response<HyperBody> {
        let status = self.status();
        let body: HyperBody = match self.body {
            Body::Empty => Empty::new().map_err(|never| match never {}).boxed(),
            Body::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed(),
            Body::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed(),
        };

        let mut res = http::Response::new(body);
        *res.status_mut() = status;
        *res.headers_mut() = self.headers;
        res
    }
}
