//! Per-request dispatch: match, build the chain, run it, record, release.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::{Instrument, debug, error, info_span};

use crate::metrics::{HANDLER_ERROR, Metrics, NOT_FOUND};
use crate::middleware::{BoxedMiddleware, compose};
use crate::pool::ContextPool;
use crate::request::Request;
use crate::response::Response;
use crate::router::{RouteMatch, RouteTable};

/// Turns one [`Request`] into one [`Response`].
///
/// Cheap to clone; every connection task holds its own copy. Nothing in here
/// ever fails outward: unmatched routes become `404`, failing or panicking
/// chains become `500` unless they already picked a status.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    middleware: Arc<[BoxedMiddleware]>,
    pool: Arc<ContextPool>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(
        table: Arc<RouteTable>,
        middleware: Vec<BoxedMiddleware>,
        pool: Arc<ContextPool>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { table, middleware: middleware.into(), pool, metrics }
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method().to_owned();
        let path = request.path().to_owned();
        let span = info_span!("request", method = %method, path = %path);
        let mut ctx = self.pool.acquire(request, span.clone());

        let Some(RouteMatch { route, params }) = self.table.find(&method, &path) else {
            ctx.response_mut().set_error(StatusCode::NOT_FOUND, "not found");
            self.record(&method, &path, StatusCode::NOT_FOUND, start, Some(NOT_FOUND));
            return self.pool.release(ctx);
        };
        ctx.bind_params(params);

        let mut layers = self.middleware.to_vec();
        layers.extend(route.middleware().iter().cloned());
        let chain = compose(route.handlers(), &layers);

        let outcome = AssertUnwindSafe(chain.call(&mut ctx))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        match failure {
            Some(reason) => {
                error!(parent: &span, error = %reason, path = %path, "handler error");
                let status = match ctx.response_status() {
                    Some(status) => status,
                    None => {
                        ctx.response_mut()
                            .set_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                self.record(&method, route.pattern(), status, start, Some(HANDLER_ERROR));
            }
            None => {
                let status = match ctx.response_status() {
                    Some(status) => status,
                    None => {
                        debug!(parent: &span, route = route.pattern(), "no status set, answering 200");
                        ctx.status(StatusCode::OK);
                        StatusCode::OK
                    }
                };
                self.record(&method, route.pattern(), status, start, None);
            }
        }

        self.pool.release(ctx)
    }

    fn record(&self, method: &str, path: &str, status: StatusCode, start: Instant, kind: Option<&str>) {
        let Some(metrics) = &self.metrics else { return };
        metrics.record_request(method, path, status);
        metrics.observe_latency(method, path, start.elapsed());
        if let Some(kind) = kind {
            metrics.record_error(method, path, kind);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Ctx;
    use crate::error::{Error, Result};
    use crate::handler::handler;
    use crate::method::Method;

    async fn explode(_ctx: &mut Ctx) -> Result<()> {
        panic!("kaboom")
    }

    fn dispatcher(table: RouteTable) -> Dispatcher {
        Dispatcher::new(
            Arc::new(table),
            Vec::new(),
            Arc::new(ContextPool::new()),
            Some(Arc::new(Metrics::new())),
        )
    }

    #[tokio::test]
    async fn unknown_method_is_a_miss() {
        let table = RouteTable::new();
        table.register(Method::Get, "/x", vec![handler(|_ctx| Box::pin(async { Ok(()) }))], Vec::new()).unwrap();
        let d = dispatcher(table);

        let res = d.dispatch(Request::new("BREW", "/x")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(d.metrics().unwrap().error_count("BREW", "/x", NOT_FOUND), 1);
    }

    #[tokio::test]
    async fn silent_success_is_answered_200() {
        let table = RouteTable::new();
        table.register(Method::Get, "/quiet", vec![handler(|_ctx| Box::pin(async { Ok(()) }))], Vec::new()).unwrap();
        let d = dispatcher(table);

        let res = d.dispatch(Request::new("GET", "/quiet")).await;
        assert_eq!(res.explicit_status(), Some(StatusCode::OK));
        assert_eq!(d.metrics().unwrap().request_count("GET", "/quiet", StatusCode::OK), 1);
        assert_eq!(d.pool().idle(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_a_status_the_handler_chose() {
        let table = RouteTable::new();
        table.register(
            Method::Post,
            "/items/:id",
            vec![handler(|ctx| Box::pin(async move {
                ctx.status(StatusCode::CONFLICT);
                Err(Error::msg("already exists"))
            }))],
            Vec::new(),
        ).unwrap();
        let d = dispatcher(table);

        let res = d.dispatch(Request::new("POST", "/items/3")).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let metrics = d.metrics().unwrap();
        assert_eq!(metrics.request_count("POST", "/items/:id", StatusCode::CONFLICT), 1);
        assert_eq!(metrics.error_count("POST", "/items/:id", HANDLER_ERROR), 1);
    }

    #[tokio::test]
    async fn panics_become_500() {
        let table = RouteTable::new();
        table.register(
            Method::Get,
            "/boom",
            vec![handler(|ctx| Box::pin(explode(ctx)))],
            Vec::new(),
        ).unwrap();
        let d = dispatcher(table);

        let res = d.dispatch(Request::new("GET", "/boom")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().bytes(), br#"{"error":"internal server error"}"#);
        assert_eq!(d.metrics().unwrap().error_count("GET", "/boom", HANDLER_ERROR), 1);
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"static"), "panic: static");
        assert_eq!(panic_message(&String::from("owned")), "panic: owned");
        assert_eq!(panic_message(&42u8), "panic");
    }
}
