//! Minimal fastrest example: JSON CRUD endpoints, an authenticated group,
//! health checks and metrics.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8080/users/42
//!   curl -X POST http://localhost:8080/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl 'http://localhost:8080/search?q=rust&limit=5&tags=a,b'
//!   curl -u admin:secret http://localhost:8080/admin/whoami
//!   curl http://localhost:8080/health
//!   curl http://localhost:8080/metrics

use std::sync::Arc;

use fastrest::metrics::LogCountLayer;
use fastrest::middleware::auth::BasicAuth;
use fastrest::{App, Config, Ctx, Result, StatusCode};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?
        .health_check(true)
        .metrics(true)
        .request_logger(true)
        .banner(true);
    let app = App::new(config)?;

    let fmt = tracing_subscriber::fmt::layer();
    let counts = app.metrics().map(|m| LogCountLayer::new(Arc::clone(m)));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt)
        .with(counts)
        .init();

    app.get("/users/:id", get_user)?
        .post("/users", create_user)?
        .delete("/users/:id", |ctx| Box::pin(async move { ctx.no_content() }))?
        .get("/search", search)?;

    let mut admin = app.group("/admin");
    admin.use_middleware(BasicAuth::new(|user, pass| user == "admin" && pass == "secret"));
    admin.get("/whoami", |ctx| Box::pin(async move {
        let user = ctx.auth().map(|a| a.principal().to_owned()).unwrap_or_default();
        ctx.ok(&serde_json::json!({ "user": user }))
    }))?;

    app.listen().await
}

// GET /users/:id
fn get_user(ctx: &mut Ctx) -> fastrest::BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or("unknown").to_owned();
        ctx.ok(&User { id, name: "alice".into() })
    })
}

// POST /users
fn create_user(ctx: &mut Ctx) -> fastrest::BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let input: CreateUser = match ctx.parse_body() {
            Ok(input) => input,
            Err(_) => return ctx.bad_request("expected {\"name\": string}"),
        };
        ctx.set_header("location", "/users/99")?;
        ctx.created(&User { id: "99".into(), name: input.name })
    })
}

// GET /search?q=..&limit=..&tags=a,b
fn search(ctx: &mut Ctx) -> fastrest::BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let q = ctx.query_or("q", "").to_owned();
        let limit = ctx.query_as_or("limit", 10u32);
        let tags: Vec<String> = ctx.query_list("tags", ",").into_iter().map(String::from).collect();
        if q.is_empty() {
            return ctx.error(StatusCode::UNPROCESSABLE_ENTITY, "q is required");
        }
        ctx.ok(&serde_json::json!({ "q": q, "limit": limit, "tags": tags }))
    })
}
