//! Request metrics.
//!
//! Counters live in sharded maps of atomics, so recording from many
//! connections at once never waits on a global lock. Each latency key keeps a
//! running `(sum, count)` pair behind its own small mutex; the mean is only
//! computed when somebody reads it.
//!
//! Two renderings are available:
//!
//! - [`Metrics::render_text`] for the `/metrics` endpoint, in the Prometheus
//!   text exposition format, keys sorted.
//! - [`Metrics::render_structured`] for `/metrics/json`, a serde snapshot.
//!
//! A snapshot reads keys one at a time and is not atomic across keys.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Error kind for requests that matched no route.
pub const NOT_FOUND: &str = "not_found";
/// Error kind for handler chains that returned `Err` or panicked.
pub const HANDLER_ERROR: &str = "handler_error";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RequestKey {
    method: String,
    path: String,
    status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ErrorKey {
    method: String,
    path: String,
    kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RouteKey {
    method: String,
    path: String,
}

#[derive(Debug, Default)]
struct Latency {
    sum_ms: f64,
    count: u64,
}

impl Latency {
    fn add(&mut self, ms: f64) {
        self.sum_ms += ms;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_ms / self.count as f64)
    }
}

/// Process-wide request metrics.
#[derive(Debug)]
pub struct Metrics {
    requests: DashMap<RequestKey, AtomicU64>,
    errors: DashMap<ErrorKey, AtomicU64>,
    latencies: DashMap<RouteKey, Mutex<Latency>>,
    logs: DashMap<&'static str, AtomicU64>,
    active_connections: AtomicI64,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`Metrics`], served at `/metrics/json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// `METHOD_path_status` → count.
    pub requests: BTreeMap<String, u64>,
    /// `METHOD_path_kind` → count.
    pub errors: BTreeMap<String, u64>,
    /// `METHOD_path` → mean latency in milliseconds.
    pub latencies_ms: BTreeMap<String, f64>,
    /// Log level → events seen.
    pub logs: BTreeMap<String, u64>,
    pub active_connections: i64,
    pub uptime_seconds: f64,
}

fn bump<K>(map: &DashMap<K, AtomicU64>, key: K)
where
    K: Eq + std::hash::Hash,
{
    if let Some(count) = map.get(&key) {
        count.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(key).or_default().fetch_add(1, Ordering::Relaxed);
}

fn sorted<K: Ord + Clone>(map: &DashMap<K, AtomicU64>) -> Vec<(K, u64)>
where
    K: Eq + std::hash::Hash,
{
    let mut entries: Vec<_> = map
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            errors: DashMap::new(),
            latencies: DashMap::new(),
            logs: DashMap::new(),
            active_connections: AtomicI64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_request(&self, method: &str, path: &str, status: StatusCode) {
        let key = RequestKey { method: method.to_owned(), path: path.to_owned(), status: status.as_u16() };
        bump(&self.requests, key);
    }

    pub fn observe_latency(&self, method: &str, path: &str, elapsed: Duration) {
        let key = RouteKey { method: method.to_owned(), path: path.to_owned() };
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if let Some(slot) = self.latencies.get(&key) {
            slot.lock().add(elapsed_ms);
            return;
        }
        self.latencies.entry(key).or_default().lock().add(elapsed_ms);
    }

    pub fn record_error(&self, method: &str, path: &str, kind: &str) {
        let key = ErrorKey { method: method.to_owned(), path: path.to_owned(), kind: kind.to_owned() };
        bump(&self.errors, key);
    }

    pub fn record_log(&self, level: &Level) {
        bump(&self.logs, level_name(level));
    }

    pub fn inc_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn request_count(&self, method: &str, path: &str, status: StatusCode) -> u64 {
        let key = RequestKey { method: method.to_owned(), path: path.to_owned(), status: status.as_u16() };
        self.requests.get(&key).map_or(0, |count| count.load(Ordering::Relaxed))
    }

    pub fn error_count(&self, method: &str, path: &str, kind: &str) -> u64 {
        let key = ErrorKey { method: method.to_owned(), path: path.to_owned(), kind: kind.to_owned() };
        self.errors.get(&key).map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Mean latency in milliseconds, `None` before the first observation.
    pub fn mean_latency_ms(&self, method: &str, path: &str) -> Option<f64> {
        let key = RouteKey { method: method.to_owned(), path: path.to_owned() };
        self.latencies.get(&key)?.lock().mean()
    }

    fn latency_means(&self) -> Vec<(RouteKey, f64)> {
        let mut means: Vec<_> = self
            .latencies
            .iter()
            .filter_map(|entry| {
                let mean = entry.value().lock().mean()?;
                Some((entry.key().clone(), mean))
            })
            .collect();
        means.sort_by(|a, b| a.0.cmp(&b.0));
        means
    }

    /// Prometheus text exposition.
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP http_requests_total Total number of HTTP requests\n");
        out.push_str("# TYPE http_requests_total counter\n");
        for (key, count) in sorted(&self.requests) {
            let _ = writeln!(
                out,
                r#"http_requests_total{{method="{}",path="{}",status="{}"}} {count}"#,
                escape(&key.method),
                escape(&key.path),
                key.status,
            );
        }

        out.push_str("\n# HELP http_request_duration_ms HTTP request latency in milliseconds\n");
        out.push_str("# TYPE http_request_duration_ms gauge\n");
        for (key, mean) in self.latency_means() {
            let _ = writeln!(
                out,
                r#"http_request_duration_ms{{method="{}",path="{}"}} {mean:.2}"#,
                escape(&key.method),
                escape(&key.path),
            );
        }

        out.push_str("\n# HELP http_errors_total Total number of HTTP errors\n");
        out.push_str("# TYPE http_errors_total counter\n");
        for (key, count) in sorted(&self.errors) {
            let _ = writeln!(
                out,
                r#"http_errors_total{{method="{}",path="{}",type="{}"}} {count}"#,
                escape(&key.method),
                escape(&key.path),
                escape(&key.kind),
            );
        }

        out.push_str("\n# HELP active_connections Current active connections\n");
        out.push_str("# TYPE active_connections gauge\n");
        let _ = writeln!(out, "active_connections {}", self.active_connections());

        out.push_str("\n# HELP uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE uptime_seconds gauge\n");
        let _ = writeln!(out, "uptime_seconds {:.2}", self.uptime().as_secs_f64());

        out
    }

    pub fn render_structured(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: sorted(&self.requests)
                .into_iter()
                .map(|(k, v)| (format!("{}_{}_{}", k.method, k.path, k.status), v))
                .collect(),
            errors: sorted(&self.errors)
                .into_iter()
                .map(|(k, v)| (format!("{}_{}_{}", k.method, k.path, k.kind), v))
                .collect(),
            latencies_ms: self
                .latency_means()
                .into_iter()
                .map(|(k, mean)| (format!("{}_{}", k.method, k.path), mean))
                .collect(),
            logs: sorted(&self.logs)
                .into_iter()
                .map(|(level, v)| (level.to_owned(), v))
                .collect(),
            active_connections: self.active_connections(),
            uptime_seconds: self.uptime().as_secs_f64(),
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        _ => "trace",
    }
}

/// Label value escaping per the text exposition format.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str(r"\\"),
            '"' => escaped.push_str(r#"\""#),
            '\n' => escaped.push_str(r"\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

// ── Log counting ──────────────────────────────────────────────────────────────

/// A `tracing_subscriber` layer that counts every event by level into
/// [`Metrics`], surfaced as `logs` in the JSON snapshot.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fastrest::Metrics;
/// use fastrest::metrics::LogCountLayer;
/// use tracing_subscriber::prelude::*;
///
/// let metrics = Arc::new(Metrics::new());
/// tracing_subscriber::registry()
///     .with(tracing_subscriber::fmt::layer())
///     .with(LogCountLayer::new(Arc::clone(&metrics)))
///     .init();
/// ```
#[derive(Debug, Clone)]
pub struct LogCountLayer {
    metrics: Arc<Metrics>,
}

impl LogCountLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S: Subscriber> Layer<S> for LogCountLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.metrics.record_log(event.metadata().level());
    }
}
