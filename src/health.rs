//! Built-in health-check handlers.
//!
//! | Probe | Path | Answer |
//! |---|---|---|
//! | **Detailed** | `{health_path}` | status, uptime, timestamp, runtime stats |
//! | **Liveness** | `{health_path}/live` | `{"status":"ok"}` |
//! | **Readiness** | `{health_path}/ready` | `{"status":"ok"}` |
//!
//! [`App`](crate::App) registers all three when `health_check` is enabled.
//! To gate readiness on your dependencies, disable the built-ins and register
//! your own handler in their place:
//!
//! ```rust
//! use fastrest::{Router, StatusCode};
//!
//! let router = Router::new();
//! router.get("/health/ready", |ctx| Box::pin(async move {
//!     if dependencies_are_healthy().await {
//!         ctx.ok(&serde_json::json!({ "status": "ok" }))
//!     } else {
//!         ctx.error(StatusCode::SERVICE_UNAVAILABLE, "not ready")
//!     }
//! })).unwrap();
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::context::Ctx;
use crate::error::Result;
use crate::handler::{BoxFuture, Handler};
use crate::metrics::Metrics;

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

const OK: Status = Status { status: "ok" };

/// Liveness probe. If the process can answer at all, it is alive.
pub fn liveness(ctx: &mut Ctx) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.ok(&OK) })
}

/// Readiness probe, default implementation: always ready.
pub fn readiness(ctx: &mut Ctx) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.ok(&OK) })
}

#[derive(Serialize)]
struct Report {
    status: &'static str,
    uptime: String,
    uptime_seconds: f64,
    timestamp: String,
    system: SystemReport,
}

#[derive(Serialize)]
struct SystemReport {
    num_cpus: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokio_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokio_alive_tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_connections: Option<i64>,
}

/// The detailed `{health_path}` handler.
pub struct HealthReport {
    started: Instant,
    metrics: Option<Arc<Metrics>>,
}

impl HealthReport {
    pub fn new(started: Instant, metrics: Option<Arc<Metrics>>) -> Self {
        Self { started, metrics }
    }

    fn report(&self) -> Report {
        let uptime = self.started.elapsed();
        let runtime = tokio::runtime::Handle::try_current().ok().map(|handle| handle.metrics());

        Report {
            status: "ok",
            uptime: format_uptime(uptime),
            uptime_seconds: uptime.as_secs_f64(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            system: SystemReport {
                num_cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
                tokio_workers: runtime.as_ref().map(|m| m.num_workers()),
                tokio_alive_tasks: runtime.as_ref().map(|m| m.num_alive_tasks()),
                active_connections: self.metrics.as_ref().map(|m| m.active_connections()),
            },
        }
    }
}

impl Handler for HealthReport {
    fn call<'a>(&'a self, ctx: &'a mut Ctx) -> BoxFuture<'a, Result<()>> {
        let report = self.report();
        Box::pin(async move { ctx.ok(&report) })
    }
}

/// `1h2m3s`, `4m0s`, `12s`.
fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s}s"),
        _ => format!("{h}h{m}m{s}s"),
    }
}
