//! Middleware and chain composition.
//!
//! Middleware wraps the rest of the chain. It sees the request before the
//! inner layers and the response after them, and it can stop the request by
//! not calling [`Next::run`] at all.
//!
//! # Ordering
//!
//! [`compose`] turns a route's handler sequence and the middleware that
//! applies to it (global first, then route-local) into one [`BoxedHandler`]:
//!
//! 1. Fold the handlers right-to-left into a terminal link. Each handler runs
//!    and hands over to the next only if it returned `Ok`.
//! 2. Fold the middleware right-to-left around that terminal, so the first
//!    registered middleware ends up outermost.
//!
//! With global `[A, B]` and route `[C]` the observed order is
//! `A → B → C → handlers → C → B → A`.

pub mod auth;
pub mod logger;

use std::sync::Arc;

use crate::context::Ctx;
use crate::error::Result;
use crate::handler::{BoxFuture, BoxedHandler, Handler};

/// A layer around the rest of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>>;
}

/// A type-erased middleware shared across routes.
pub type BoxedMiddleware = Arc<dyn Middleware>;

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Ctx, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self)(ctx, next)
    }
}

/// Boxes a closure as a [`BoxedMiddleware`].
pub fn from_fn<F>(f: F) -> BoxedMiddleware
where
    F: for<'a> Fn(&'a mut Ctx, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The remainder of the chain, handed to a middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    inner: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Runs every inner layer and the route's handlers.
    pub fn run<'b>(self, ctx: &'b mut Ctx) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        self.inner.call(ctx)
    }
}

// ── Composition ───────────────────────────────────────────────────────────────

/// Runs `first`, then `rest` only if `first` succeeded.
struct Then {
    first: BoxedHandler,
    rest: BoxedHandler,
}

impl Handler for Then {
    fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.first.call(ctx).await?;
            self.rest.call(ctx).await
        })
    }
}

/// One middleware wrapped around the chain built so far.
struct Layered {
    middleware: BoxedMiddleware,
    inner: BoxedHandler,
}

impl Handler for Layered {
    fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>> {
        self.middleware.handle(ctx, Next { inner: self.inner.as_ref() })
    }
}

/// A route with no handlers succeeds without touching the response.
struct Noop;

impl Handler for Noop {
    fn call<'a>(&'a self, _ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Composes `handlers` and `middleware` into a single callable chain.
pub fn compose(handlers: &[BoxedHandler], middleware: &[BoxedMiddleware]) -> BoxedHandler {
    let mut remaining = handlers.iter().rev();
    let mut chain: BoxedHandler = match remaining.next() {
        Some(last) => Arc::clone(last),
        None => Arc::new(Noop),
    };
    for handler in remaining {
        chain = Arc::new(Then { first: Arc::clone(handler), rest: chain });
    }

    for layer in middleware.iter().rev() {
        chain = Arc::new(Layered { middleware: Arc::clone(layer), inner: chain });
    }
    chain
}
