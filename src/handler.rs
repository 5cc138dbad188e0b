//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A route holds a *sequence* of handlers, and every route in the table holds
//! handlers of different concrete types. They all live behind one trait
//! object, [`BoxedHandler`] = `Arc<dyn Handler>`.
//!
//! A handler borrows the request context mutably for the duration of its
//! future, so the future's lifetime is tied to that borrow:
//!
//! ```text
//! fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>>
//! ```
//!
//! Closures get the trait through a blanket impl. Pass them straight to a
//! registration method (or to [`handler`]) so the compiler can infer the
//! higher-ranked signature:
//!
//! ```rust
//! use fastrest::{Router, StatusCode};
//!
//! let router = Router::new();
//! router.get("/ping", |ctx| Box::pin(async move {
//!     ctx.text(StatusCode::OK, "pong")
//! })).unwrap();
//! ```
//!
//! Per request the cost is one `Arc` clone per chain link plus one virtual
//! call per layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Ctx;
use crate::error::Result;

/// A heap-allocated, type-erased future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One step of a route's handler sequence.
///
/// Returning `Err` stops the sequence: later handlers do not run and the
/// dispatcher answers `500` unless a status was already set.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>> {
        (self)(ctx)
    }
}

/// Boxes a closure or function as a [`BoxedHandler`].
///
/// Useful when building the handler list for
/// [`Router::route`](crate::Router::route).
pub fn handler<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}
