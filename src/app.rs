//! The application: routes, global middleware and the services they share.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;

use crate::config::Config;
use crate::context::Ctx;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::handler::{BoxFuture, BoxedHandler};
use crate::health::{self, HealthReport};
use crate::method::Method;
use crate::metrics::Metrics;
use crate::middleware::logger::RequestLogger;
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::pool::ContextPool;
use crate::response::ContentType;
use crate::router::Router;
use crate::server::Server;

/// Builds the route table and serves it.
///
/// ```rust,no_run
/// use fastrest::{App, Config, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> fastrest::Result<()> {
///     let app = App::new(Config::default().metrics(true))?;
///     app.get("/hello/:name", |ctx| Box::pin(async move {
///         let name = ctx.param("name").unwrap_or("world").to_owned();
///         ctx.text(StatusCode::OK, format!("hello {name}"))
///     }))?;
///     app.listen().await
/// }
/// ```
pub struct App {
    config: Config,
    router: Router,
    middleware: Vec<BoxedMiddleware>,
    pool: Arc<ContextPool>,
    metrics: Option<Arc<Metrics>>,
    started: Instant,
}

macro_rules! verbs {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name<F>(&self, path: &str, f: F) -> Result<&Self>
            where
                F: for<'a> Fn(&'a mut Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
            {
                self.router.$name(path, f)?;
                Ok(self)
            }
        )*
    };
}

impl App {
    /// Fails only if a built-in route cannot be registered, e.g. because
    /// `health_path` does not start with `/`.
    pub fn new(config: Config) -> Result<Self> {
        let metrics = config.metrics.then(|| Arc::new(Metrics::new()));
        let mut app = Self {
            router: Router::new(),
            middleware: Vec::new(),
            pool: Arc::new(ContextPool::with_max_idle(config.max_idle_contexts)),
            metrics,
            started: Instant::now(),
            config,
        };

        if app.config.request_logger {
            app.use_middleware(RequestLogger::new());
        }
        if app.config.health_check {
            app.register_health_routes()?;
        }
        if app.metrics.is_some() {
            app.register_metrics_routes()?;
        }
        Ok(app)
    }

    fn register_health_routes(&self) -> Result<()> {
        let base = self.config.health_path.as_str();
        let report: BoxedHandler = Arc::new(HealthReport::new(self.started, self.metrics.clone()));
        self.router.route(Method::Get, base, vec![report], Vec::new())?;
        self.router.get(&format!("{base}/live"), health::liveness)?;
        self.router.get(&format!("{base}/ready"), health::readiness)?;
        Ok(())
    }

    fn register_metrics_routes(&self) -> Result<()> {
        let Some(metrics) = &self.metrics else { return Ok(()) };

        let text = Arc::clone(metrics);
        self.router.get("/metrics", move |ctx| {
            let body = text.render_text();
            Box::pin(async move { ctx.send(StatusCode::OK, ContentType::Prometheus, body) })
        })?;

        let json = Arc::clone(metrics);
        self.router.get("/metrics/json", move |ctx| {
            let snapshot = json.render_structured();
            Box::pin(async move { ctx.ok(&snapshot) })
        })?;
        Ok(())
    }

    /// Adds global middleware. It wraps every route, including ones
    /// registered earlier, and runs outside any group middleware.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// A route group under `prefix`. See [`Router::group`].
    pub fn group(&self, prefix: &str) -> Router {
        self.router.group(prefix)
    }

    /// The root router, for [`Router::route`] and friends.
    pub fn router(&self) -> &Router {
        &self.router
    }

    verbs!(get, post, put, patch, delete, head, options);

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// A dispatcher over the current routes and global middleware.
    ///
    /// Routes registered later are still seen; global middleware added later
    /// is not.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(self.router.table()),
            self.middleware.clone(),
            Arc::clone(&self.pool),
            self.metrics.clone(),
        )
    }

    /// Binds `config.addr` and serves until SIGINT or SIGTERM.
    pub async fn listen(self) -> Result<()> {
        let server = Server::from_config(&self.config)?;
        if self.config.banner {
            server.announce(&self.config, self.router.count());
        }
        server.serve(self.dispatcher()).await
    }

    /// Like [`listen`](Self::listen), stopping when `signal` resolves.
    pub async fn listen_with_shutdown(
        self,
        signal: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let server = Server::from_config(&self.config)?;
        if self.config.banner {
            server.announce(&self.config, self.router.count());
        }
        server.serve_with_shutdown(self.dispatcher(), signal).await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("routes", &self.router.count())
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn builtin_routes_follow_config() {
        let bare = App::new(Config::default()).unwrap();
        assert_eq!(bare.router().count(), 0);

        let full = App::new(Config::default().health_check(true).metrics(true)).unwrap();
        assert_eq!(full.router().count(), 5);

        let d = full.dispatcher();
        for path in ["/health", "/health/live", "/health/ready", "/metrics", "/metrics/json"] {
            let res = d.dispatch(Request::new("GET", path)).await;
            assert_eq!(res.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn custom_health_path() {
        let app = App::new(Config::default().health_check(true).health_path("/hc")).unwrap();
        let res = app.dispatcher().dispatch(Request::new("GET", "/hc/live")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn bad_health_path_is_an_error() {
        assert!(App::new(Config::default().health_check(true).health_path("health")).is_err());
    }

    #[tokio::test]
    async fn metrics_endpoints_expose_recorded_requests() {
        let app = App::new(Config::default().metrics(true)).unwrap();
        app.get("/a", |ctx| Box::pin(async move { ctx.text(StatusCode::OK, "a") })).unwrap();
        let d = app.dispatcher();

        d.dispatch(Request::new("GET", "/a")).await;
        let res = d.dispatch(Request::new("GET", "/metrics")).await;

        assert_eq!(res.header("content-type"), Some(ContentType::Prometheus.as_str()));
        let text = std::str::from_utf8(res.body().bytes()).unwrap();
        assert!(text.contains(r#"http_requests_total{method="GET",path="/a",status="200"} 1"#));

        let res = d.dispatch(Request::new("GET", "/metrics/json")).await;
        let json: serde_json::Value = serde_json::from_slice(res.body().bytes()).unwrap();
        assert_eq!(json["requests"]["GET_/a_200"], 1);
    }
}
