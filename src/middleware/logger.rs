//! Access-log middleware.

use std::time::Instant;

use tracing::{info, warn};

use crate::context::Ctx;
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};

/// Logs one line per request once the inner layers have finished: method,
/// path, final status, latency and peer address.
///
/// 4xx and 5xx are logged at `WARN`, everything else at `INFO`. The event is
/// parented to the request span so it carries the span's fields too.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestLogger {
    fn handle<'a>(&'a self, ctx: &'a mut Ctx, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let start = Instant::now();
            let outcome = next.run(ctx).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            // A failed chain without a status is answered 500 by the dispatcher.
            let status = match (ctx.response_status(), &outcome) {
                (Some(status), _) => status.as_u16(),
                (None, Ok(())) => 200,
                (None, Err(_)) => 500,
            };

            if status >= 400 {
                warn!(
                    parent: ctx.span(),
                    method = ctx.method(),
                    path = ctx.path(),
                    status,
                    latency_ms,
                    remote = ?ctx.remote_addr(),
                    "request failed"
                );
            } else {
                info!(
                    parent: ctx.span(),
                    method = ctx.method(),
                    path = ctx.path(),
                    status,
                    latency_ms,
                    remote = ?ctx.remote_addr(),
                    "request completed"
                );
            }
            outcome
        })
    }
}
