//! Per-request context.
//!
//! A [`Ctx`] is the mutable state one request carries through its handler
//! chain: the matched path parameters, request-scoped values, the auth
//! result, the transport's request and response, and the request's tracing
//! span. Contexts come from the [`ContextPool`](crate::ContextPool) and are
//! owned by exactly one request between acquire and release.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use futures_util::Stream;
use http::StatusCode;
use http::header::{CONTENT_LENGTH, LOCATION};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use tracing::Span;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{ContentType, Response};

// ── Auth result ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
    ApiKey,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic  => "basic",
            Self::Bearer => "bearer",
            Self::ApiKey => "apikey",
        }
    }
}

/// Credentials an auth middleware accepted for this request.
///
/// The principal is the username for Basic, the token for Bearer and the key
/// for API-key auth.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthInfo {
    scheme: AuthScheme,
    principal: String,
    password: Option<String>,
    valid: bool,
}

impl AuthInfo {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Basic,
            principal: username.into(),
            password: Some(password.into()),
            valid: true,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self { scheme: AuthScheme::Bearer, principal: token.into(), password: None, valid: true }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self { scheme: AuthScheme::ApiKey, principal: key.into(), password: None, valid: true }
    }

    pub fn scheme(&self) -> AuthScheme { self.scheme }
    pub fn principal(&self) -> &str { &self.principal }
    pub fn password(&self) -> Option<&str> { self.password.as_deref() }
    pub fn is_valid(&self) -> bool { self.valid }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("valid", &self.valid)
            .finish()
    }
}

// ── Ctx ───────────────────────────────────────────────────────────────────────

/// Mutable, exclusively owned per-request state.
pub struct Ctx {
    request: Request,
    response: Response,
    params: HashMap<String, String>,
    locals: HashMap<String, Box<dyn Any + Send + Sync>>,
    auth: Option<AuthInfo>,
    span: Span,
}

impl Ctx {
    /// A standalone context outside any pool, handy for exercising a handler
    /// directly.
    pub fn new(request: Request) -> Self {
        let mut ctx = Self::empty();
        ctx.attach(request, Span::none());
        ctx
    }

    pub(crate) fn empty() -> Self {
        Self {
            request: Request::default(),
            response: Response::new(),
            params: HashMap::new(),
            locals: HashMap::new(),
            auth: None,
            span: Span::none(),
        }
    }

    pub(crate) fn attach(&mut self, request: Request, span: Span) {
        self.clear();
        self.request = request;
        self.response = Response::new();
        self.span = span;
    }

    /// Drops everything request-specific and hands back the response.
    pub(crate) fn detach(&mut self) -> Response {
        self.clear();
        self.request = Request::default();
        self.span = Span::none();
        std::mem::take(&mut self.response)
    }

    fn clear(&mut self) {
        self.params.clear();
        self.locals.clear();
        self.auth = None;
    }

    pub(crate) fn bind_params(&mut self, params: impl IntoIterator<Item = (String, String)>) {
        self.params.extend(params);
    }

    // ── Request ──────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.request }
    pub fn method(&self) -> &str { self.request.method() }
    pub fn path(&self) -> &str { self.request.path() }
    pub fn body(&self) -> &Bytes { self.request.body() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.request.remote_addr() }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Decodes the JSON request body into `T`.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        JsonCodec.decode(self.request.body())
    }

    /// A matched path parameter. For `/users/:id` on `/users/42`,
    /// `ctx.param("id")` is `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    // ── Query accessors ──────────────────────────────────────────────────────
    //
    // Strict accessors fail on a missing or malformed value; the `_or`
    // variants swallow the failure and return the fallback.

    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query(key)
    }

    /// The query value, or `default` when it is missing or empty.
    pub fn query_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.query(key) {
            Some(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    fn query_required(&self, key: &str) -> Result<&str> {
        match self.query(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::query(key, "missing")),
        }
    }

    /// Parses the query value with [`FromStr`]: integers, floats, or any
    /// other parseable type.
    pub fn query_as<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.query_required(key)?.parse().map_err(|e| Error::query(key, e))
    }

    pub fn query_as_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.query_as(key).unwrap_or(default)
    }

    /// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
    pub fn query_bool(&self, key: &str) -> Result<bool> {
        parse_bool(self.query_required(key)?).map_err(|e| Error::query(key, e))
    }

    pub fn query_bool_or(&self, key: &str, default: bool) -> bool {
        self.query_bool(key).unwrap_or(default)
    }

    /// Parses durations such as `300ms`, `1.5h` or `2h45m`.
    pub fn query_duration(&self, key: &str) -> Result<Duration> {
        parse_duration(self.query_required(key)?).map_err(|e| Error::query(key, e))
    }

    pub fn query_duration_or(&self, key: &str, default: Duration) -> Duration {
        self.query_duration(key).unwrap_or(default)
    }

    /// Parses a timestamp with a `chrono` format string, e.g. `"%Y-%m-%dT%H:%M:%S"`.
    pub fn query_time(&self, key: &str, format: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.query_required(key)?, format)
            .map_err(|e| Error::query(key, e))
    }

    pub fn query_time_or(&self, key: &str, format: &str, default: NaiveDateTime) -> NaiveDateTime {
        self.query_time(key, format).unwrap_or(default)
    }

    /// Splits the query value on `separator`. Missing or empty yields `[]`.
    pub fn query_list(&self, key: &str, separator: &str) -> Vec<&str> {
        match self.query(key) {
            Some(v) if !v.is_empty() => v.split(separator).collect(),
            _ => Vec::new(),
        }
    }

    /// Like [`query_list`](Self::query_list), parsing every non-empty item.
    pub fn query_list_as<T>(&self, key: &str, separator: &str) -> Result<Vec<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.query_list(key, separator)
            .into_iter()
            .filter(|item| !item.is_empty())
            .map(|item| item.parse().map_err(|e| Error::query(key, e)))
            .collect()
    }

    // ── Request-scoped values ────────────────────────────────────────────────

    pub fn set_local<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.locals.insert(key.into(), Box::new(value));
    }

    /// `None` if the key is missing or holds a different type.
    pub fn local<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key)?.downcast_ref::<T>()
    }

    /// Removes and returns the value. A value of another type stays put.
    pub fn take_local<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.locals.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.locals.remove(key)?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    pub fn auth(&self) -> Option<&AuthInfo> { self.auth.as_ref() }
    pub fn set_auth(&mut self, auth: AuthInfo) { self.auth = Some(auth); }

    /// The request's span. Log with `tracing::info!(parent: ctx.span(), ..)`.
    pub fn span(&self) -> &Span { &self.span }

    // ── Response ─────────────────────────────────────────────────────────────

    pub fn response(&self) -> &Response { &self.response }
    pub fn response_mut(&mut self) -> &mut Response { &mut self.response }

    /// The status set so far, if any.
    pub fn response_status(&self) -> Option<StatusCode> {
        self.response.explicit_status()
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.response.set_status(status);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.response.set_header(name, value)
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> Result<()> {
        let body = JsonCodec.encode(value)?;
        self.response.set_content(status, JsonCodec.content_type(), body);
        Ok(())
    }

    pub fn text(&mut self, status: StatusCode, body: impl Into<String>) -> Result<()> {
        self.send(status, ContentType::Text, body.into())
    }

    pub fn send(&mut self, status: StatusCode, content_type: ContentType, body: impl Into<Bytes>) -> Result<()> {
        self.response.set_content(status, content_type, body.into());
        Ok(())
    }

    /// Streams the body without buffering it.
    pub fn send_stream<S>(&mut self, status: StatusCode, content_type: ContentType, stream: S) -> Result<()>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
    {
        self.response.set_content(status, content_type, Bytes::new());
        self.response.set_body_stream(stream);
        Ok(())
    }

    /// Streams the file at `path` with a `200`, typed by its extension. A
    /// file that cannot be opened is `Err(Error::Io)` and leaves the
    /// response untouched.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        self.send_stream(StatusCode::OK, ContentType::from_path(path), ReaderStream::new(file))?;
        self.response.set_header(CONTENT_LENGTH.as_str(), &len.to_string())
    }

    pub fn redirect(&mut self, location: &str, status: StatusCode) -> Result<()> {
        self.response.set_header(LOCATION.as_str(), location)?;
        self.response.set_status(status);
        Ok(())
    }

    pub fn no_content(&mut self) -> Result<()> {
        self.response.set_status(StatusCode::NO_CONTENT);
        Ok(())
    }

    pub fn ok<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.json(StatusCode::OK, value)
    }

    pub fn created<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.json(StatusCode::CREATED, value)
    }

    pub fn bad_request(&mut self, message: &str) -> Result<()> {
        self.error(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(&mut self, message: &str) -> Result<()> {
        self.error(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(&mut self, message: &str) -> Result<()> {
        self.error(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(&mut self, message: &str) -> Result<()> {
        self.error(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_server_error(&mut self, message: &str) -> Result<()> {
        self.error(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// `{"error": message}` with `status`.
    pub fn error(&mut self, status: StatusCode, message: &str) -> Result<()> {
        self.response.set_error(status, message);
        Ok(())
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("method", &self.request.method())
            .field("path", &self.request.path())
            .field("params", &self.params)
            .field("locals", &self.locals.keys().collect::<Vec<_>>())
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

// ── Parsers ───────────────────────────────────────────────────────────────────

fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("invalid boolean `{other}`")),
    }
}

/// Decimal numbers, each with an optional fraction and a unit suffix
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). A bare `0` is allowed.
fn parse_duration(s: &str) -> Result<Duration, String> {
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.starts_with('-') {
        return Err(format!("negative duration `{s}`"));
    }
    if rest.is_empty() {
        return Err(format!("invalid duration `{s}`"));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let value: f64 = rest[..split]
            .parse()
            .map_err(|_| format!("invalid duration `{s}`"))?;
        rest = &rest[split..];

        let split = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..split] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration `{s}`")),
            unit => return Err(format!("unknown unit `{unit}` in duration `{s}`")),
        };
        nanos += value * scale;
        rest = &rest[split..];
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use http_body_util::BodyExt;

    fn ctx(target: &str) -> Ctx {
        Ctx::new(Request::new("GET", target))
    }

    #[test]
    fn typed_query_accessors() {
        let c = ctx("/?n=42&pi=3.5&on=T&tags=a,b,,c&ids=1,2,3&bad=x1");
        assert_eq!(c.query_as::<i32>("n").unwrap(), 42);
        assert_eq!(c.query_as::<i64>("n").unwrap(), 42);
        assert_eq!(c.query_as::<f32>("pi").unwrap(), 3.5);
        assert!(c.query_bool("on").unwrap());
        assert_eq!(c.query_list("tags", ","), vec!["a", "b", "", "c"]);
        assert_eq!(c.query_list_as::<u32>("ids", ",").unwrap(), vec![1, 2, 3]);
        assert!(c.query_list("absent", ",").is_empty());
    }

    #[test]
    fn strict_accessors_fail_and_defaulted_ones_fall_back() {
        let c = ctx("/?bad=x1&empty=");
        assert!(matches!(c.query_as::<i32>("bad"), Err(Error::Query { .. })));
        assert!(c.query_as::<i32>("missing").is_err());
        assert_eq!(c.query_as_or("bad", 7), 7);
        assert_eq!(c.query_or("empty", "dflt"), "dflt");
        assert!(!c.query_bool_or("bad", false));
        assert!(c.query_list_as::<u32>("bad", ",").is_err());
    }

    #[test]
    fn durations_and_times() {
        let c = ctx("/?d=1h30m&short=250ms&mixed=1.5s&bogus=10x&t=2024-05-01T10:20:30");
        assert_eq!(c.query_duration("d").unwrap(), Duration::from_secs(5400));
        assert_eq!(c.query_duration("short").unwrap(), Duration::from_millis(250));
        assert_eq!(c.query_duration("mixed").unwrap(), Duration::from_millis(1500));
        assert!(c.query_duration("bogus").is_err());
        assert_eq!(c.query_duration_or("bogus", Duration::from_secs(1)), Duration::from_secs(1));

        let t = c.query_time("t", "%Y-%m-%dT%H:%M:%S").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(10, 20, 30).unwrap();
        assert_eq!(t, expected);
        assert_eq!(c.query_time_or("d", "%Y", expected), expected);
    }

    #[test]
    fn duration_parser_edge_cases() {
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("+2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("10us"), Ok(Duration::from_micros(10)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("5").is_err());
    }

    #[test]
    fn locals_are_typed() {
        let mut c = ctx("/");
        c.set_local("user_id", 42u64);
        c.set_local("role", String::from("admin"));
        assert_eq!(c.local::<u64>("user_id"), Some(&42));
        assert_eq!(c.local::<String>("user_id"), None);
        assert_eq!(c.take_local::<i32>("user_id"), None);
        assert_eq!(c.take_local::<String>("role").as_deref(), Some("admin"));
        assert_eq!(c.local::<String>("role"), None);
        assert_eq!(c.local::<u64>("user_id"), Some(&42));
    }

    #[test]
    fn responders_set_status_and_body() {
        let mut c = ctx("/");
        assert_eq!(c.response_status(), None);
        c.created(&serde_json::json!({"id": 3})).unwrap();
        assert_eq!(c.response_status(), Some(StatusCode::CREATED));
        assert_eq!(c.response().body().bytes(), br#"{"id":3}"#);

        c.redirect("/elsewhere", StatusCode::FOUND).unwrap();
        assert_eq!(c.response().header("location"), Some("/elsewhere"));
    }

    #[test]
    fn detach_returns_response_and_wipes_state() {
        let mut c = ctx("/a");
        c.bind_params([("id".to_owned(), "1".to_owned())]);
        c.set_local("k", 1u8);
        c.set_auth(AuthInfo::bearer("tok"));
        c.text(StatusCode::ACCEPTED, "queued").unwrap();

        let res = c.detach();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert!(c.params().is_empty());
        assert!(c.locals.is_empty());
        assert!(c.auth().is_none());
        assert_eq!(c.path(), "");
    }

    #[test]
    fn auth_debug_redacts_password() {
        let info = AuthInfo::basic("admin", "secret");
        let shown = format!("{info:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("secret"));
    }

    #[tokio::test]
    async fn send_file_streams_with_a_guessed_type() {
        let path = std::env::temp_dir().join(format!("fastrest-send-file-{}.json", std::process::id()));
        tokio::fs::write(&path, br#"{"ok":true}"#).await.unwrap();

        let mut c = ctx("/download");
        c.send_file(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        let res = c.detach();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.header("content-length"), Some("11"));
        assert!(res.body().is_stream());
        let bytes = res.into_hyper().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn send_file_reports_a_missing_file() {
        let mut c = ctx("/download");
        let err = c.send_file("/definitely/not/here.txt").await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
        assert_eq!(c.response().explicit_status(), None);
    }
}
