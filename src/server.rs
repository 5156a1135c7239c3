//! HTTP server and graceful shutdown.
//!
//! One tokio task per connection; hyper calls the chain once per request on
//! that connection. Each request gets its own [`Context`](crate::Context);
//! nothing is shared between requests except the chain's [`Logger`](crate::Logger).
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops `listener.accept()`, so no new connections;
//! 2. closes idle keep-alive connections and lets in-flight requests finish
//!    (up to 30 seconds);
//! 3. waits for pending request-log flushes;
//! 4. returns from [`Server::serve`].
//!
//! If a client disconnects mid-request, hyper drops the request future and
//! the chain still finishes the context (end hooks fire, record is flushed).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::chain::Chain;
use crate::config::Config;
use crate::error::Error;

/// How long in-flight requests may run after a shutdown signal.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string. Use
    /// [`from_config`](Self::from_config) to get an error instead.
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let addr = config.listen.parse()
            .map_err(|_| Error::InvalidAddr(config.listen.clone()))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds and serves until the process receives a shutdown signal.
    pub async fn serve(self, chain: Chain) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_until(listener, chain, shutdown_signal()).await
    }
}

/// Serves `listener` until `shutdown` resolves, then drains connections and
/// pending log flushes.
///
/// Idle keep-alive connections are closed at shutdown. Connections still
/// busy 30 seconds later are aborted; their requests are finished and
/// logged like any dropped request.
pub async fn serve_until<F>(listener: TcpListener, chain: Chain, shutdown: F) -> Result<(), Error>
where
    F: std::future::Future<Output = ()>,
{
    let chain = Arc::new(chain);
    let logger = chain.logger().clone();

    info!(addr = %listener.local_addr()?, "strata listening");

    let builder = ConnBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Shutdown first, so a SIGTERM stops accepting even with a backlog.
            biased;

            () = &mut shutdown => {
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

                let chain = Arc::clone(&chain);
                let svc = service_fn(move |req| {
                    let chain = Arc::clone(&chain);
                    async move { dispatch(chain, req, remote_addr).await }
                });
                let conn = graceful.watch(builder.serve_connection(TokioIo::new(stream), svc).into_owned());

                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    tokio::select! {
        () = graceful.shutdown() => {}
        () = tokio::time::sleep(DRAIN_GRACE) => {
            warn!(open = tasks.len(), "connections still busy after {DRAIN_GRACE:?}, aborting them");
        }
    }
    tasks.shutdown().await;
    logger.flush().await;

    info!("strata stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Reads the body, runs the chain, returns its committed response.
///
/// Failures are turned into responses here, so hyper never sees an error.
async fn dispatch(
    chain: Arc<Chain>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            let mut res = http::Response::new(Full::new(Bytes::from_static(b"Bad Request")));
            *res.status_mut() = http::StatusCode::BAD_REQUEST;
            return Ok(res);
        }
    };

    let req = http::Request::from_parts(parts, body);
    Ok(chain.handle(req, Some(remote_addr)).await)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C only, off Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
