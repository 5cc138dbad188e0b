//! Reusable request contexts.

use parking_lot::Mutex;
use tracing::Span;

use crate::context::Ctx;
use crate::request::Request;
use crate::response::Response;

pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A free list of [`Ctx`] objects.
///
/// Acquire never blocks on capacity: an empty list just allocates. Release
/// keeps at most `max_idle` contexts around and drops the rest, so a burst
/// does not pin its peak memory forever. The lock is held only for a single
/// push or pop.
#[derive(Debug)]
pub struct ContextPool {
    free: Mutex<Vec<Ctx>>,
    max_idle: usize,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), max_idle }
    }

    /// A clean context owning `request`.
    pub fn acquire(&self, request: Request, span: Span) -> Ctx {
        let recycled = self.free.lock().pop();
        let mut ctx = recycled.unwrap_or_else(Ctx::empty);
        ctx.attach(request, span);
        ctx
    }

    /// Wipes `ctx`, keeps it for reuse and hands back its response.
    pub fn release(&self, mut ctx: Ctx) -> Response {
        let response = ctx.detach();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(ctx);
        }
        response
    }

    /// Contexts currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthInfo;
    use http::StatusCode;

    #[test]
    fn released_contexts_carry_no_residue() {
        let pool = ContextPool::new();

        let mut ctx = pool.acquire(Request::new("GET", "/users/1"), Span::none());
        ctx.bind_params([("id".to_owned(), "1".to_owned())]);
        ctx.set_local("tenant", String::from("acme"));
        ctx.set_auth(AuthInfo::bearer("tok"));
        ctx.text(StatusCode::OK, "first").unwrap();

        let res = pool.release(ctx);
        assert_eq!(res.body().bytes(), b"first");
        assert_eq!(pool.idle(), 1);

        let ctx = pool.acquire(Request::new("POST", "/other"), Span::none());
        assert_eq!(pool.idle(), 0);
        assert!(ctx.params().is_empty());
        assert!(ctx.local::<String>("tenant").is_none());
        assert!(ctx.auth().is_none());
        assert_eq!(ctx.response_status(), None);
        assert!(ctx.response().body().bytes().is_empty());
        assert_eq!(ctx.path(), "/other");
    }

    #[test]
    fn grows_on_demand_and_caps_retention() {
        let pool = ContextPool::with_max_idle(2);
        let held: Vec<_> = (0..5)
            .map(|_| pool.acquire(Request::new("GET", "/"), Span::none()))
            .collect();
        assert_eq!(pool.idle(), 0);

        for ctx in held {
            pool.release(ctx);
        }
        assert_eq!(pool.idle(), 2);
    }
}
