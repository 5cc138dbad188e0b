//! # fastrest
//!
//! A request dispatch engine for JSON services: ordered routing with path
//! parameters, composable middleware, pooled per-request contexts and live
//! request metrics, served over hyper.
//!
//! ## How a request flows
//!
//! 1. The [`Server`] buffers the request and hands it to the [`Dispatcher`].
//! 2. The dispatcher takes a [`Ctx`] from the [`ContextPool`] and looks the
//!    path up in the [`RouteTable`]. First registered match wins; no match
//!    is a `404`.
//! 3. Global middleware, then the route's group middleware, then its
//!    handlers run as one composed chain.
//! 4. A chain that fails or panics becomes a `500` unless it already chose a
//!    status. One that succeeds without choosing becomes a `200`.
//! 5. Metrics are recorded, the context goes back to the pool and its
//!    response goes out.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fastrest::middleware::auth::BasicAuth;
//! use fastrest::{App, Config, Ctx, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> fastrest::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let app = App::new(Config::from_env()?.health_check(true).metrics(true))?;
//!
//!     app.get("/echo/:word", |ctx| Box::pin(async move {
//!         let word = ctx.param("word").unwrap_or_default().to_owned();
//!         ctx.text(StatusCode::OK, word)
//!     }))?;
//!
//!     let mut admin = app.group("/admin");
//!     admin.use_middleware(BasicAuth::new(|user, pass| user == "admin" && pass == "secret"));
//!     admin.get("/whoami", whoami)?;
//!
//!     app.listen().await
//! }
//!
//! fn whoami(ctx: &mut Ctx) -> fastrest::BoxFuture<'_, fastrest::Result<()>> {
//!     Box::pin(async move {
//!         let who = ctx.auth().map(|a| a.principal().to_owned()).unwrap_or_default();
//!         ctx.ok(&serde_json::json!({ "user": who }))
//!     })
//! }
//! ```

mod app;
mod codec;
mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod method;
mod pool;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod metrics;
pub mod middleware;

pub use app::App;
pub use codec::{Codec, JsonCodec};
pub use config::Config;
pub use context::{AuthInfo, AuthScheme, Ctx};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use handler::{BoxFuture, BoxedHandler, Handler, handler};
pub use method::Method;
pub use metrics::{LogCountLayer, Metrics, MetricsSnapshot};
pub use middleware::{BoxedMiddleware, Middleware, Next};
pub use pool::ContextPool;
pub use request::Request;
pub use response::{Body, BodyStream, ContentType, Response};
pub use router::{Pattern, Route, RouteMatch, RouteTable, Router};
pub use server::{Server, shutdown_signal};

pub use http::StatusCode;
