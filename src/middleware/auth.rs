//! Credential-checking middleware.
//!
//! Each strategy knows how to pull credentials out of a request and nothing
//! else. Whether they are acceptable is the caller's validator's decision, so
//! any identity source can sit behind it.
//!
//! | Strategy | Reads | On success |
//! |---|---|---|
//! | [`BasicAuth`] | `Authorization: Basic <base64(user:pass)>` | [`AuthInfo::basic`] |
//! | [`BearerAuth`] | `Authorization: Bearer <token>` | [`AuthInfo::bearer`] |
//! | [`ApiKeyAuth`] | `X-API-Key` (configurable) | [`AuthInfo::api_key`] |
//! | [`CombinedAuth`] | API key, then Bearer, then Basic | whichever branch ran |
//!
//! A rejected request gets `401` with a `{"error": ..}` body and never reaches
//! the inner layers. That is a normal response, not a handler failure.
//!
//! ```rust
//! use fastrest::Router;
//! use fastrest::middleware::auth::BasicAuth;
//!
//! let mut admin = Router::new().group("/admin");
//! admin.use_middleware(BasicAuth::new(|user, pass| user == "admin" && pass == "secret"));
//! ```

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};

use crate::context::{AuthInfo, Ctx};
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};

pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

const BASIC_CHALLENGE: &str = r#"Basic realm="Restricted""#;

/// Accepts or rejects a username/password pair.
pub type BasicValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Accepts or rejects a bearer token or API key.
pub type TokenValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

// ── Rejection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rejection {
    message: &'static str,
    challenge: bool,
}

impl Rejection {
    fn new(message: &'static str) -> Self {
        Self { message, challenge: false }
    }

    /// Also asks the client for Basic credentials.
    fn challenge(message: &'static str) -> Self {
        Self { message, challenge: true }
    }
}

type Verdict = std::result::Result<AuthInfo, Rejection>;

/// Attaches the auth result and continues, or answers 401.
async fn settle(ctx: &mut Ctx, next: Next<'_>, verdict: Verdict) -> Result<()> {
    match verdict {
        Ok(info) => {
            ctx.set_auth(info);
            next.run(ctx).await
        }
        Err(rejection) => {
            if rejection.challenge {
                ctx.set_header(WWW_AUTHENTICATE.as_str(), BASIC_CHALLENGE)?;
            }
            ctx.unauthorized(rejection.message)
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn decode_basic(encoded: &str) -> std::result::Result<(String, String), Rejection> {
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| Rejection::new("invalid base64 encoding"))?;
    // Bytes that are not UTF-8 still reach the validator, as U+FFFD.
    let decoded = String::from_utf8_lossy(&decoded);
    let (user, pass) = decoded
        .split_once(':')
        .ok_or(Rejection::new("invalid credentials format"))?;
    Ok((user.to_owned(), pass.to_owned()))
}

fn check_basic(validator: &BasicValidator, encoded: &str) -> Verdict {
    let (user, pass) = decode_basic(encoded)?;
    if validator(&user, &pass) {
        Ok(AuthInfo::basic(user, pass))
    } else {
        Err(Rejection::new("invalid credentials"))
    }
}

// ── Basic ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BasicAuth {
    validator: BasicValidator,
}

impl BasicAuth {
    pub fn new(validator: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self { validator: Arc::new(validator) }
    }

    fn verify(&self, authorization: Option<&str>) -> Verdict {
        let Some(header) = present(authorization) else {
            return Err(Rejection::challenge("missing authorization header"));
        };
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(Rejection::new("invalid authorization type"))?;
        check_basic(&self.validator, encoded)
    }
}

impl Middleware for BasicAuth {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        let verdict = self.verify(ctx.header(AUTHORIZATION.as_str()));
        Box::pin(settle(ctx, next, verdict))
    }
}

// ── Bearer ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BearerAuth {
    validator: TokenValidator,
}

impl BearerAuth {
    pub fn new(validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self { validator: Arc::new(validator) }
    }

    fn verify(&self, authorization: Option<&str>) -> Verdict {
        let Some(header) = present(authorization) else {
            return Err(Rejection::new("missing authorization header"));
        };
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(Rejection::new("invalid authorization type"))?;
        if (self.validator)(token) {
            Ok(AuthInfo::bearer(token))
        } else {
            Err(Rejection::new("invalid token"))
        }
    }
}

impl Middleware for BearerAuth {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        let verdict = self.verify(ctx.header(AUTHORIZATION.as_str()));
        Box::pin(settle(ctx, next, verdict))
    }
}

// ── API key ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ApiKeyAuth {
    validator: TokenValidator,
    header: String,
}

impl ApiKeyAuth {
    /// Reads the key from `X-API-Key`.
    pub fn new(validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self { validator: Arc::new(validator), header: DEFAULT_API_KEY_HEADER.to_owned() }
    }

    /// Reads the key from `name` instead. An empty name keeps the default.
    pub fn header(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.header = name;
        }
        self
    }

    fn verify(&self, key: Option<&str>) -> Verdict {
        let Some(key) = present(key) else {
            return Err(Rejection::new("missing API key"));
        };
        if (self.validator)(key) {
            Ok(AuthInfo::api_key(key))
        } else {
            Err(Rejection::new("invalid API key"))
        }
    }
}

impl Middleware for ApiKeyAuth {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        let verdict = self.verify(ctx.header(&self.header));
        Box::pin(settle(ctx, next, verdict))
    }
}

// ── Combined ──────────────────────────────────────────────────────────────────

/// Accepts any of the configured credential types.
///
/// Checked in a fixed order: API key (when the key header is present and a
/// key validator is set), then Bearer, then Basic. The first applicable
/// branch decides; later ones are not tried.
#[derive(Clone)]
pub struct CombinedAuth {
    basic: Option<BasicValidator>,
    bearer: Option<TokenValidator>,
    api_key: Option<TokenValidator>,
    api_key_header: String,
}

impl Default for CombinedAuth {
    fn default() -> Self {
        Self {
            basic: None,
            bearer: None,
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_owned(),
        }
    }
}

impl CombinedAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn basic(mut self, validator: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        self.basic = Some(Arc::new(validator));
        self
    }

    pub fn bearer(mut self, validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.bearer = Some(Arc::new(validator));
        self
    }

    pub fn api_key(mut self, validator: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.api_key = Some(Arc::new(validator));
        self
    }

    pub fn api_key_header(mut self, name: impl Into<String>) -> Self {
        self.api_key_header = name.into();
        self
    }

    fn verify(&self, authorization: Option<&str>, key: Option<&str>) -> Verdict {
        if let (Some(key), Some(validator)) = (present(key), &self.api_key) {
            return if validator(key) {
                Ok(AuthInfo::api_key(key))
            } else {
                Err(Rejection::new("invalid API key"))
            };
        }

        let Some(header) = present(authorization) else {
            return Err(Rejection::challenge("missing authorization"));
        };

        if let (Some(token), Some(validator)) = (header.strip_prefix("Bearer "), &self.bearer) {
            return if validator(token) {
                Ok(AuthInfo::bearer(token))
            } else {
                Err(Rejection::new("invalid token"))
            };
        }

        if let (Some(encoded), Some(validator)) = (header.strip_prefix("Basic "), &self.basic) {
            return check_basic(validator, encoded);
        }

        Err(Rejection::new("invalid authorization"))
    }
}

impl Middleware for CombinedAuth {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        let verdict = self.verify(
            ctx.header(AUTHORIZATION.as_str()),
            ctx.header(&self.api_key_header),
        );
        Box::pin(settle(ctx, next, verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthScheme;
    use crate::handler::handler;
    use crate::middleware::{BoxedMiddleware, compose};
    use crate::request::Request;
    use http::header::HeaderValue;
    use http::{HeaderName, StatusCode};

    fn admin() -> BasicAuth {
        BasicAuth::new(|user, pass| user == "admin" && pass == "secret")
    }

    #[test]
    fn basic_accepts_valid_credentials() {
        let info = admin().verify(Some("Basic YWRtaW46c2VjcmV0")).unwrap();
        assert_eq!(info.scheme(), AuthScheme::Basic);
        assert_eq!(info.principal(), "admin");
        assert_eq!(info.password(), Some("secret"));
        assert!(info.is_valid());
    }

    #[test]
    fn basic_passes_non_utf8_credentials_to_the_validator() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let record = Arc::clone(&seen);
        let auth = BasicAuth::new(move |user, pass| {
            *record.lock() = Some((user.to_owned(), pass.to_owned()));
            true
        });

        // "adm\xffn:secret"
        let info = auth.verify(Some("Basic YWRt/246c2VjcmV0")).unwrap();
        assert_eq!(info.principal(), "adm\u{fffd}n");
        assert_eq!(*seen.lock(), Some(("adm\u{fffd}n".to_owned(), "secret".to_owned())));
    }

    #[test]
    fn basic_rejections() {
        let auth = admin();
        assert_eq!(auth.verify(None), Err(Rejection::challenge("missing authorization header")));
        assert_eq!(auth.verify(Some("")), Err(Rejection::challenge("missing authorization header")));
        assert_eq!(auth.verify(Some("Bearer x")), Err(Rejection::new("invalid authorization type")));
        assert_eq!(auth.verify(Some("Basic !!!")), Err(Rejection::new("invalid base64 encoding")));
        // "adminsecret" has no colon
        assert_eq!(auth.verify(Some("Basic YWRtaW5zZWNyZXQ=")), Err(Rejection::new("invalid credentials format")));
        // admin:wrong
        assert_eq!(auth.verify(Some("Basic YWRtaW46d3Jvbmc=")), Err(Rejection::new("invalid credentials")));
    }

    #[test]
    fn basic_password_may_contain_colons() {
        let auth = BasicAuth::new(|_, pass| pass == "a:b");
        // u:a:b
        assert!(auth.verify(Some("Basic dTphOmI=")).is_ok());
    }

    #[test]
    fn bearer_and_api_key() {
        let bearer = BearerAuth::new(|t| t == "tok");
        assert_eq!(bearer.verify(Some("Bearer tok")).unwrap().principal(), "tok");
        assert_eq!(bearer.verify(Some("Bearer nope")), Err(Rejection::new("invalid token")));
        assert_eq!(bearer.verify(Some("Basic tok")), Err(Rejection::new("invalid authorization type")));
        assert_eq!(bearer.verify(None), Err(Rejection::new("missing authorization header")));

        let keys = ApiKeyAuth::new(|k| k == "k1").header("");
        assert_eq!(keys.header, DEFAULT_API_KEY_HEADER);
        assert_eq!(keys.verify(Some("k1")).unwrap().scheme(), AuthScheme::ApiKey);
        assert_eq!(keys.verify(Some("k2")), Err(Rejection::new("invalid API key")));
        assert_eq!(keys.verify(None), Err(Rejection::new("missing API key")));
    }

    #[test]
    fn combined_priority_is_api_key_then_bearer_then_basic() {
        let auth = CombinedAuth::new()
            .api_key(|k| k == "key")
            .bearer(|t| t == "tok")
            .basic(|u, p| u == "admin" && p == "secret");

        // API key wins even when a valid bearer token is present.
        let info = auth.verify(Some("Bearer tok"), Some("key")).unwrap();
        assert_eq!(info.scheme(), AuthScheme::ApiKey);

        // A bad key is final: the bearer token is not consulted.
        assert_eq!(auth.verify(Some("Bearer tok"), Some("bad")), Err(Rejection::new("invalid API key")));

        assert_eq!(auth.verify(Some("Bearer tok"), None).unwrap().scheme(), AuthScheme::Bearer);
        assert_eq!(auth.verify(Some("Basic YWRtaW46c2VjcmV0"), None).unwrap().scheme(), AuthScheme::Basic);
        assert_eq!(auth.verify(None, None), Err(Rejection::challenge("missing authorization")));
        assert_eq!(auth.verify(Some("Digest x"), None), Err(Rejection::new("invalid authorization")));
    }

    #[test]
    fn combined_skips_branches_without_validators() {
        let auth = CombinedAuth::new().basic(|_, _| true);
        // No key validator: the key header is ignored.
        assert_eq!(auth.verify(Some("Basic dTpw"), Some("key")).unwrap().scheme(), AuthScheme::Basic);
        // No bearer validator: a bearer header has nowhere to go.
        assert_eq!(auth.verify(Some("Bearer tok"), None), Err(Rejection::new("invalid authorization")));
    }

    #[tokio::test]
    async fn rejection_answers_401_with_challenge_and_skips_inner_layers() {
        let chain = compose(
            &[handler(|ctx| Box::pin(async move { ctx.text(StatusCode::OK, "in") }))],
            &[Arc::new(admin()) as BoxedMiddleware],
        );

        let mut ctx = Ctx::new(Request::new("GET", "/"));
        chain.call(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(ctx.response().header("www-authenticate"), Some(BASIC_CHALLENGE));
        assert_eq!(ctx.response().body().bytes(), br#"{"error":"missing authorization header"}"#);
        assert!(ctx.auth().is_none());
    }

    #[tokio::test]
    async fn success_attaches_auth_before_running_inner_layers() {
        let chain = compose(
            &[handler(|ctx| Box::pin(async move {
                let who = ctx.auth().map(|a| a.principal().to_owned()).unwrap_or_default();
                ctx.text(StatusCode::OK, who)
            }))],
            &[Arc::new(ApiKeyAuth::new(|k| k == "k1").header("X-Token")) as BoxedMiddleware],
        );

        let req = Request::new("GET", "/")
            .with_header(HeaderName::from_static("x-token"), HeaderValue::from_static("k1"));
        let mut ctx = Ctx::new(req);
        chain.call(&mut ctx).await.unwrap();

        assert_eq!(ctx.response().body().bytes(), b"k1");
    }
}
