//! Incoming HTTP request, as delivered by the transport.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, LengthLimitError, Limited};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a transport body could not be buffered.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ReadBodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(BoxError),
}

/// A fully buffered incoming request.
///
/// The server builds one per hyper request. Tests and embedders can build
/// them directly and hand them to [`Dispatcher::dispatch`](crate::Dispatcher::dispatch):
///
/// ```rust
/// use fastrest::Request;
/// use http::header::{AUTHORIZATION, HeaderValue};
///
/// let req = Request::new("GET", "/users/42?fields=name")
///     .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer t0k3n"));
/// assert_eq!(req.path(), "/users/42");
/// assert_eq!(req.query("fields"), Some("name"));
/// ```
#[derive(Debug, Default)]
pub struct Request {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// `target` is the request-target: a path with an optional `?query`.
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        Self {
            method: method.to_owned(),
            path: path.to_owned(),
            query: parse_query(query),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Buffers at most `limit` body bytes. A declared `Content-Length`
    /// over the limit is refused before any of the body is read.
    pub(crate) async fn from_hyper<B>(
        req: http::Request<B>,
        remote_addr: SocketAddr,
        limit: usize,
    ) -> Result<Self, ReadBodyError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let declared = parts.headers.get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit as u64) {
            return Err(ReadBodyError::TooLarge { limit });
        }

        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => return Err(ReadBodyError::TooLarge { limit }),
            Err(e) => return Err(ReadBodyError::Read(e)),
        };
        Ok(Self {
            method: parts.method.as_str().to_owned(),
            path: parts.uri.path().to_owned(),
            query: parse_query(parts.uri.query()),
            headers: parts.headers,
            body,
            remote_addr: Some(remote_addr),
        })
    }

    pub fn method(&self) -> &str { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Decoded query pairs, in request order.
    pub fn query_pairs(&self) -> &[(String, String)] { &self.query }

    /// First value for `key` in the query string.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) if !q.is_empty() => serde_urlencoded::from_str(q).unwrap_or_default(),
        _ => Vec::new(),
    }
}
