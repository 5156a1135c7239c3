//! The middleware chain.
//!
//! ```text
//! Pending ──► Running ──┬──► Completed   every handler returned Ok
//!                       ├──► Errored     a handler returned Err
//!                       ├──► Panicked    a handler panicked
//!                       ├──► TimedOut    the active scope hit its deadline
//!                       └──► Cancelled   the active scope was cancelled
//! ```
//!
//! Handlers run one at a time in registration order. The first `Err` stops
//! the chain. Each handler is raced against the context's active
//! [`CancelScope`](crate::CancelScope); when the scope wins, the handler's
//! future is dropped and the rest of the chain is skipped.
//!
//! Every terminal state resolves to at most one response through
//! [`ResponseState::commit_with`](crate::ResponseState::commit_with), so a
//! response already committed by a handler is never overwritten. The end
//! hooks then fire exactly once, also when the transport drops the request
//! mid-flight.

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::pin;

use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use http_body_util::Full;
use serde_json::json;

use crate::cancel::DoneReason;
use crate::config::Config;
use crate::context::Context;
use crate::error::{BoxError, Error, HttpError, find_http_error};
use crate::handler::{BoxedHandler, Handler};
use crate::logger::{Level, Logger, LoggerConfig};
use crate::panic;
use crate::request::Request;
use crate::response::ContentType;

/// The terminal state a run ended in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainState {
    Completed,
    Errored,
    Panicked,
    TimedOut,
    Cancelled,
}

/// Why the chain stopped early.
pub enum Failure {
    /// A handler returned `Err`.
    Handler(BoxError),
    /// A handler panicked. `backtrace` was captured at the panic site.
    Panic { message: String, backtrace: Option<String> },
}

impl Failure {
    /// The status carried by an [`HttpError`] in the error chain, else 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Handler(err) => find_http_error(err.as_ref())
                .map_or(StatusCode::INTERNAL_SERVER_ERROR, HttpError::status),
            Self::Panic { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body text sent to the client. Only structured errors expose their
    /// message.
    fn public_message(&self) -> String {
        let generic = || {
            StatusCode::INTERNAL_SERVER_ERROR.canonical_reason().unwrap_or_default().to_owned()
        };
        match self {
            Self::Handler(err) => find_http_error(err.as_ref())
                .map_or_else(generic, |e| e.message().to_owned()),
            Self::Panic { .. } => generic(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(err) => write!(f, "{err}"),
            Self::Panic { message, .. } => write!(f, "panic: {message}"),
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(err) => f.debug_tuple("Handler").field(err).finish(),
            Self::Panic { message, .. } => f.debug_struct("Panic").field("message", message).finish_non_exhaustive(),
        }
    }
}

/// How one run of the chain ended.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Failed(Failure),
    TimedOut,
    Cancelled,
}

impl Outcome {
    pub fn state(&self) -> ChainState {
        match self {
            Self::Completed => ChainState::Completed,
            Self::Failed(Failure::Handler(_)) => ChainState::Errored,
            Self::Failed(Failure::Panic { .. }) => ChainState::Panicked,
            Self::TimedOut => ChainState::TimedOut,
            Self::Cancelled => ChainState::Cancelled,
        }
    }

    fn from_reason(reason: Option<DoneReason>) -> Self {
        match reason {
            Some(DoneReason::DeadlineExceeded) => Self::TimedOut,
            _ => Self::Cancelled,
        }
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered list of middleware plus the logger its requests write to.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use strata::{Chain, Context, HttpError, Logger, Router, middleware};
/// use http::{Method, StatusCode};
///
/// async fn show(ctx: Context) -> Result<(), HttpError> {
///     let id = ctx.param("id").ok_or_else(HttpError::not_found)?;
///     ctx.response().text(format!("order {id}"));
///     Ok(())
/// }
///
/// let chain = Chain::new()
///     .with_logger(Logger::stderr())
///     .with(middleware::timeout(Duration::from_secs(5)))
///     .with(middleware::request_log())
///     .with(Router::new().on(Method::GET, "/orders/{id}", show));
/// ```
pub struct Chain {
    handlers: Vec<BoxedHandler>,
    logger: Logger,
}

impl Chain {
    /// An empty chain logging to standard error.
    pub fn new() -> Self {
        Self { handlers: Vec::new(), logger: Logger::stderr() }
    }

    /// A chain whose logger and request timeout come from `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let logger = LoggerConfig::from_settings(config.log.clone(), std::io::stderr()).build()?;
        let chain = Self { handlers: Vec::new(), logger };
        Ok(match config.request_timeout() {
            Some(d) => chain.with(crate::middleware::timeout(d)),
            None => chain,
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Appends `handler`. Returns `self` for chaining.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.handlers.push(handler.into_boxed_handler());
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs a whole request: builds its context, executes the chain and
    /// returns the committed response.
    pub async fn handle(
        &self,
        req: http::Request<Bytes>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>> {
        let ctx = Context::new(Request::from_http(req, remote_addr), self.logger.clone());
        self.execute(&ctx).await;
        ctx.response().to_http()
    }

    /// Runs the handlers, resolves the outcome into a committed response and
    /// finishes `ctx` (end hooks fire exactly once).
    ///
    /// If this future is dropped before completion, `ctx` is still finished.
    pub async fn execute(&self, ctx: &Context) -> Outcome {
        let _finish = FinishOnDrop(ctx);
        let outcome = self.run(ctx).await;
        self.resolve(ctx, &outcome);
        outcome
    }

    async fn run(&self, ctx: &Context) -> Outcome {
        panic::install_hook();

        for handler in &self.handlers {
            let mut step = pin!(AssertUnwindSafe(async { handler.call(ctx.clone()).await }).catch_unwind());

            // Re-armed whenever the handler installs a narrower scope, so a
            // deadline it derives for itself also cuts it short.
            let res = loop {
                let changed = ctx.scope_changed();
                let scope = ctx.cancellation();
                if scope.is_done() {
                    return Outcome::from_reason(scope.reason());
                }

                tokio::select! {
                    biased;

                    () = scope.done() => return Outcome::from_reason(scope.reason()),
                    () = changed => {}
                    res = &mut step => break res,
                }
            };

            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Outcome::Failed(Failure::Handler(err)),
                Err(payload) => {
                    return Outcome::Failed(Failure::Panic {
                        message: panic::panic_message(payload.as_ref()),
                        backtrace: panic::take_backtrace(),
                    });
                }
            }
        }
        Outcome::Completed
    }

    fn resolve(&self, ctx: &Context, outcome: &Outcome) {
        let res = ctx.response();
        match outcome {
            Outcome::Completed => {
                res.commit();
            }
            Outcome::Failed(failure) => {
                let status = failure.status();
                self.report(ctx, failure, status);
                res.commit_with(status, ContentType::Text, failure.public_message());
            }
            Outcome::TimedOut => {
                // Preset the 504 so timeout hooks can reshape it before the
                // commit. Nothing runs when a response was already committed.
                if res.send(StatusCode::GATEWAY_TIMEOUT, ContentType::Text, "Gateway Timeout") {
                    ctx.fire_timeout_hooks();
                    res.commit();
                }
            }
            Outcome::Cancelled => {
                res.commit_with(StatusCode::SERVICE_UNAVAILABLE, ContentType::Text, "Service Unavailable");
            }
        }
    }

    /// Notes the failure on the request's record and, for server errors,
    /// writes an Error-level line with a trace.
    fn report(&self, ctx: &Context, failure: &Failure, status: StatusCode) {
        ctx.log_record().insert("error", failure.to_string());

        let req = ctx.request();
        let entry = json!({
            "error": failure.to_string(),
            "method": req.method().as_str(),
            "url": req.uri().to_string(),
            "status": status.as_u16(),
        });
        match failure {
            Failure::Panic { backtrace, .. } => {
                self.logger.log_with_trace(Level::Error, entry, backtrace.as_deref());
            }
            Failure::Handler(_) if status.is_server_error() => self.logger.log(Level::Error, entry),
            Failure::Handler(_) => {}
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

struct FinishOnDrop<'a>(&'a Context);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}
