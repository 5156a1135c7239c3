//! # strata
//!
//! Per-request context, a sequential middleware chain and structured
//! request logging for hyper services.
//!
//! ## The request lifecycle
//!
//! ```text
//! accept ─► Context::new ─► Chain::execute ─┬─ handlers, in order, each raced
//!                                           │  against the active CancelScope
//!                                           ├─ resolve: Completed / Errored /
//!                                           │  Panicked / TimedOut / Cancelled
//!                                           │  ─► one committed response
//!                                           └─ end hooks fire once
//!                                              ─► request record flushed off-path
//! ```
//!
//! - [`Context`] carries the request, the commit-once [`ResponseState`], a
//!   tree of [`CancelScope`]s, slot-keyed [`Storage`] and end hooks.
//! - [`Chain`] runs middleware with early exit on error and turns panics
//!   into 500 responses at one boundary.
//! - [`Logger`] filters by [`Level`], writes one line per entry through one
//!   mutex, and keeps one [`LogRecord`] per request.
//!
//! Routing ([`Router`]), timeouts ([`middleware::timeout`]) and the
//! [`Server`] are thin pieces on top of that contract.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use strata::{Chain, Context, HttpError, Logger, Router, Server, middleware};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() {
//!     let chain = Chain::new()
//!         .with_logger(Logger::stderr())
//!         .with(middleware::timeout(Duration::from_secs(5)))
//!         .with(middleware::request_log())
//!         .with(Router::new().get("/users/{id}", get_user));
//!
//!     Server::bind("0.0.0.0:3000").serve(chain).await.unwrap();
//! }
//!
//! async fn get_user(ctx: Context) -> Result<(), HttpError> {
//!     let id = ctx.param("id").ok_or_else(HttpError::not_found)?;
//!     ctx.log_record().insert("user", id.clone());
//!     if id == "0" {
//!         return Err(HttpError::new(StatusCode::BAD_REQUEST, "ids start at 1"));
//!     }
//!     ctx.response().json(format!(r#"{{"id":"{id}"}}"#));
//!     Ok(())
//! }
//! ```

mod cancel;
mod chain;
mod context;
mod error;
mod handler;
mod hooks;
mod panic;
mod request;
mod response;
mod router;
mod server;
mod storage;

pub mod config;
pub mod logger;
pub mod middleware;

pub use cancel::{CancelHandle, CancelScope, DoneReason};
pub use chain::{Chain, ChainState, Failure, Outcome};
pub use config::{Config, LogSettings};
pub use context::Context;
pub use error::{BoxError, Error, HttpError};
pub use handler::{Handler, HandlerResult, IntoHandlerResult};
pub use hooks::Hooks;
pub use logger::{Level, LogRecord, Logger, LoggerConfig};
pub use request::Request;
pub use response::{ContentType, ResponseState};
pub use router::Router;
pub use server::{Server, serve_until};
pub use storage::{Slot, Storage};
