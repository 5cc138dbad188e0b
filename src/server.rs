//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Waiting up to `graceful_timeout` (default 10 s) for them, then aborting
//!    whatever is left with a warning.
//!
//! Keep `graceful_timeout` below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::request::{ReadBodyError, Request};
use crate::response::{HyperBody, Response};

/// The HTTP server.
#[derive(Debug, Clone)]
pub struct Server {
    addr: SocketAddr,
    read_timeout: Duration,
    graceful_timeout: Duration,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use fastrest::Server;
    /// let server = Server::bind("0.0.0.0:3000").unwrap();
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self> {
        let defaults = Config::default();
        let addr = addr.parse().map_err(|_| Error::InvalidAddr(addr.to_owned()))?;
        Ok(Self {
            addr,
            read_timeout: defaults.read_timeout(),
            graceful_timeout: defaults.graceful_timeout(),
            max_body_bytes: defaults.max_body_bytes,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::bind(&config.addr)?
            .read_timeout(config.read_timeout())
            .graceful_timeout(config.graceful_timeout())
            .max_body_bytes(config.max_body_bytes))
    }

    /// Maximum time a connection may take to deliver its request headers.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Request bodies larger than this are answered `413`.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Logs a one-line startup summary.
    pub(crate) fn announce(&self, config: &Config, routes: usize) {
        info!(
            addr = %self.addr,
            env = %config.env,
            routes,
            health = config.health_check,
            health_path = %config.health_path,
            metrics = config.metrics,
            "fastrest starting"
        );
    }

    /// Serves until SIGINT or SIGTERM, then shuts down gracefully.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<()> {
        self.serve_with_shutdown(dispatcher, shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown(
        self,
        dispatcher: Dispatcher,
        signal: impl Future<Output = ()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.run(listener, dispatcher, signal).await
    }

    async fn run(
        self,
        listener: TcpListener,
        dispatcher: Dispatcher,
        signal: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(addr = %listener.local_addr()?, "fastrest listening");

        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout);

        // Flipped once on shutdown; every connection task watches it.
        let (stop_tx, stop_rx) = watch::channel(false);

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    let builder = builder.clone();
                    let mut stop = stop_rx.clone();
                    let limit = self.max_body_bytes;
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let _guard = ConnectionGuard::new(dispatcher.metrics().cloned());

                        let svc = service_fn(move |req| {
                            let dispatcher = dispatcher.clone();
                            async move {
                                Ok::<_, Infallible>(handle(&dispatcher, req, remote_addr, limit).await)
                            }
                        });

                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let outcome = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = stop.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = outcome {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.graceful_timeout, drain).await.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_secs = self.graceful_timeout.as_secs(),
                "graceful shutdown timed out, aborting connections"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("fastrest stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

/// Buffers the hyper request and hands it to the dispatcher. A body over
/// `limit` is answered `413`, one that fails to arrive `400`, both without
/// touching the route table.
async fn handle(
    dispatcher: &Dispatcher,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    limit: usize,
) -> http::Response<HyperBody> {
    let (status, message) = match Request::from_hyper(req, remote_addr, limit).await {
        Ok(request) => return dispatcher.dispatch(request).await.into_hyper(),
        Err(e @ ReadBodyError::TooLarge { .. }) => {
            warn!(peer = %remote_addr, "{e}");
            (http::StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
        }
        Err(e @ ReadBodyError::Read(_)) => {
            warn!(peer = %remote_addr, "{e}");
            (http::StatusCode::BAD_REQUEST, "bad request")
        }
    };
    let mut res = Response::new();
    res.set_error(status, message);
    res.into_hyper()
}

/// Counts the connection in the active-connections gauge while alive.
struct ConnectionGuard {
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionGuard {
    fn new(metrics: Option<Arc<Metrics>>) -> Self {
        if let Some(m) = &metrics {
            m.inc_active_connections();
        }
        Self { metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(m) = &self.metrics {
            m.dec_active_connections();
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn bind_validates_the_address() {
        let server = Server::bind("127.0.0.1:8081").unwrap();
        assert_eq!(server.addr().port(), 8081);
        assert!(matches!(Server::bind("localhost"), Err(Error::InvalidAddr(_))));
    }

    #[test]
    fn from_config_carries_timeouts() {
        let config = Config::default()
            .addr("127.0.0.1:0")
            .read_timeout_secs(5)
            .graceful_timeout_secs(2)
            .max_body_bytes(512);
        let server = Server::from_config(&config).unwrap();
        assert_eq!(server.read_timeout, Duration::from_secs(5));
        assert_eq!(server.graceful_timeout, Duration::from_secs(2));
        assert_eq!(server.max_body_bytes, 512);
    }

    #[test]
    fn connection_guard_tracks_the_gauge() {
        let metrics = Arc::new(Metrics::new());
        {
            let _a = ConnectionGuard::new(Some(Arc::clone(&metrics)));
            let _b = ConnectionGuard::new(Some(Arc::clone(&metrics)));
            assert_eq!(metrics.active_connections(), 2);
        }
        assert_eq!(metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn stops_when_the_signal_fires() {
        let server = Server::bind("127.0.0.1:0").unwrap().graceful_timeout(Duration::from_millis(100));
        let app = crate::App::new(Config::default()).unwrap();
        server.serve_with_shutdown(app.dispatcher(), async {}).await.unwrap();
    }

    /// Starts `app` on an ephemeral port. Firing the returned sender shuts
    /// it down; the handle resolves once `serve` has returned.
    async fn start(
        server: Server,
        app: &crate::App,
    ) -> (SocketAddr, tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let dispatcher = app.dispatcher();
        let handle = tokio::spawn(server.run(listener, dispatcher, async {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    async fn status_line(stream: &mut tokio::net::TcpStream) -> String {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).into_owned();
        head.lines().next().unwrap_or_default().to_owned()
    }

    #[tokio::test]
    async fn oversized_bodies_get_413() {
        use tokio::io::AsyncWriteExt;

        let app = crate::App::new(Config::default()).unwrap();
        app.post("/upload", |ctx| Box::pin(async move {
            let len = ctx.body().len().to_string();
            ctx.text(StatusCode::OK, len)
        }))
        .unwrap();
        let server = Server::bind("127.0.0.1:0").unwrap().max_body_bytes(16);
        let (addr, stop, served) = start(server, &app).await;

        let mut small = tokio::net::TcpStream::connect(addr).await.unwrap();
        small
            .write_all(b"POST /upload HTTP/1.1\r\nhost: t\r\ncontent-length: 4\r\nconnection: close\r\n\r\nabcd")
            .await
            .unwrap();
        assert_eq!(status_line(&mut small).await, "HTTP/1.1 200 OK");

        let mut big = tokio::net::TcpStream::connect(addr).await.unwrap();
        big.write_all(b"POST /upload HTTP/1.1\r\nhost: t\r\ncontent-length: 1048576\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        big.write_all(&[b'x'; 64]).await.unwrap();
        assert_eq!(status_line(&mut big).await, "HTTP/1.1 413 Payload Too Large");

        stop.send(()).unwrap();
        served.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_aborts_requests_that_outlive_the_grace_period() {
        use tokio::io::AsyncWriteExt;

        let app = crate::App::new(Config::default()).unwrap();
        app.get("/slow", |ctx| Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ctx.no_content()
        }))
        .unwrap();
        let grace = Duration::from_millis(300);
        let server = Server::bind("127.0.0.1:0").unwrap().graceful_timeout(grace);
        let (addr, stop, served) = start(server, &app).await;

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /slow HTTP/1.1\r\nhost: t\r\n\r\n").await.unwrap();
        // Let the request reach the handler before shutting down.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), served).await.unwrap().unwrap().unwrap();
        let took = started.elapsed();

        assert!(took >= grace, "returned before the grace period: {took:?}");
        assert!(took < Duration::from_secs(3), "did not abort the slow request: {took:?}");
    }
}
