//! Route table and route groups.
//!
//! Patterns are plain `/`-separated paths where a segment starting with `:`
//! binds that segment to a named parameter:
//!
//! ```text
//! /users/:id/posts/:post   matches   /users/42/posts/7   (id=42, post=7)
//! ```
//!
//! No wildcards and no trailing-slash normalization: `/a` and `/a/` are
//! different routes. Lookup is a linear scan in registration order, so when
//! two routes could both match, the one registered first wins.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, BoxedHandler, handler};
use crate::method::Method;
use crate::middleware::{BoxedMiddleware, Middleware};

// ── Pattern ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidPattern { pattern: raw.to_owned(), reason };

        if raw.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(invalid("pattern must start with `/`"));
        };

        let mut names = HashSet::new();
        let mut segments = Vec::new();
        for part in rest.split('/') {
            let segment = match part.strip_prefix(':') {
                Some("") => return Err(invalid("parameter without a name")),
                Some(name) if name.contains(':') => {
                    return Err(invalid("`:` may only start a segment"));
                }
                Some(name) => {
                    if !names.insert(name) {
                        return Err(invalid("duplicate parameter name"));
                    }
                    Segment::Param(name.to_owned())
                }
                None if part.contains(':') => return Err(invalid("`:` may only start a segment")),
                None => Segment::Literal(part.to_owned()),
            };
            segments.push(segment);
        }

        Ok(Self { raw: raw.to_owned(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter bindings if `path` matches, in pattern order.
    fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let rest = path.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let mut params = Vec::new();

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), part.to_owned())),
            }
        }

        // Segment counts must be equal.
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

// ── Route ─────────────────────────────────────────────────────────────────────

/// One registered route: method, pattern, handler sequence and the
/// middleware snapshot taken at registration.
pub struct Route {
    method: Method,
    pattern: Pattern,
    handlers: Vec<BoxedHandler>,
    middleware: Vec<BoxedMiddleware>,
}

impl Route {
    pub fn method(&self) -> Method { self.method }
    pub fn pattern(&self) -> &str { self.pattern.as_str() }
    pub fn handlers(&self) -> &[BoxedHandler] { &self.handlers }
    pub fn middleware(&self) -> &[BoxedMiddleware] { &self.middleware }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.raw)
            .field("handlers", &self.handlers.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Vec<(String, String)>,
}

// ── RouteTable ────────────────────────────────────────────────────────────────

/// All routes of an application, shared by every [`Router`] view over it.
///
/// Registration takes the write lock; lookups only ever read.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Arc<Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Fails only on a malformed pattern.
    pub fn register(
        &self,
        method: Method,
        pattern: &str,
        handlers: Vec<BoxedHandler>,
        middleware: Vec<BoxedMiddleware>,
    ) -> Result<()> {
        let pattern = Pattern::parse(pattern)?;
        self.routes.write().push(Arc::new(Route { method, pattern, handlers, middleware }));
        Ok(())
    }

    /// The first route, in registration order, for `method` whose pattern
    /// matches `path`. A method string that is not a known verb matches
    /// nothing.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method: Method = method.parse().ok()?;
        self.routes
            .read()
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| {
                let params = route.pattern.matches(path)?;
                Some(RouteMatch { route: Arc::clone(route), params })
            })
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// A registration view over a [`RouteTable`]: a path prefix plus the
/// middleware that routes registered through it inherit.
///
/// [`group`](Router::group) copies the current prefix and middleware, so a
/// later [`use_middleware`](Router::use_middleware) on the parent leaves
/// existing children alone. Routes snapshot the middleware list when they
/// are registered.
///
/// ```rust
/// use fastrest::{Router, StatusCode};
///
/// let api = Router::new().group("/api");
/// api.get("/users/:id", |ctx| Box::pin(async move {
///     let id = ctx.param("id").unwrap_or_default().to_owned();
///     ctx.text(StatusCode::OK, id)
/// })).unwrap();
/// assert_eq!(api.count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Router {
    prefix: String,
    table: Arc<RouteTable>,
    middleware: Vec<BoxedMiddleware>,
}

macro_rules! verbs {
    ($($(#[$doc:meta])* $name:ident => $method:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name<F>(&self, path: &str, f: F) -> Result<&Self>
            where
                F: for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
            {
                self.route(Method::$method, path, vec![handler(f)], Vec::new())
            }
        )*
    };
}

impl Router {
    /// A root router over a fresh, empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child view: prefix appended, middleware copied.
    pub fn group(&self, prefix: &str) -> Router {
        Router {
            prefix: format!("{}{prefix}", self.prefix),
            table: Arc::clone(&self.table),
            middleware: self.middleware.clone(),
        }
    }

    /// Adds middleware for routes registered through this view from now on.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Registers a handler sequence with extra route-local middleware, which
    /// runs inside the view's own.
    pub fn route(
        &self,
        method: Method,
        path: &str,
        handlers: Vec<BoxedHandler>,
        middleware: Vec<BoxedMiddleware>,
    ) -> Result<&Self> {
        let mut layers = self.middleware.clone();
        layers.extend(middleware);
        self.table.register(method, &format!("{}{path}", self.prefix), handlers, layers)?;
        Ok(self)
    }

    verbs! {
        get => Get;
        post => Post;
        put => Put;
        patch => Patch;
        delete => Delete;
        head => Head;
        options => Options;
    }

    /// Routes registered in the whole table, not just this view.
    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("middleware", &self.middleware.len())
            .field("routes", &self.table.len())
            .finish()
    }
}
